use fp_bytecode::{
    decode_file, encode_file, AddressingMode, BytecodeError, Instruction, InstructionStream,
    Opcode, STACK_MAGIC,
};
use pretty_assertions::assert_eq;

fn countdown() -> InstructionStream {
    let mut stream = InstructionStream::new();
    stream.comment("counter");
    stream.emit(Instruction::new(Opcode::Push, AddressingMode::Absolute, 3i64));
    let top = stream.emit(Instruction::new(Opcode::Load, AddressingMode::Absolute, 0i64));
    stream.emit(Instruction::new(Opcode::Push, AddressingMode::Absolute, 1i64));
    stream.emit(Instruction::bare(Opcode::Subtract));
    stream.emit(Instruction::new(Opcode::Store, AddressingMode::Absolute, 0i64));
    stream.emit(Instruction::new(Opcode::Load, AddressingMode::Absolute, 0i64));
    let back = stream.emit_placeholder(Opcode::JumpIfTrue, AddressingMode::Relative);
    stream.patch(back, back.delta_to(top)).unwrap();
    stream.emit(Instruction::new(Opcode::Pop, AddressingMode::Absolute, 1i64));
    stream.emit(Instruction::bare(Opcode::Exit));
    stream
}

#[test]
fn linked_stream_survives_the_container() {
    let stream = countdown();
    let bytes = encode_file(&stream).unwrap();
    assert_eq!(&bytes[..4], &STACK_MAGIC);

    let file = decode_file(&bytes).unwrap();
    assert_eq!(file.stream, stream);
    assert_eq!(file.stream.comments_at(0usize.into()), ["counter".to_string()]);
}

#[test]
fn unpatched_sites_are_rejected() {
    let mut stream = countdown();
    stream.emit_placeholder(Opcode::Jump, AddressingMode::Relative);
    let err = encode_file(&stream).unwrap_err();
    assert!(matches!(err, BytecodeError::Format { .. }), "{err}");
}

#[test]
fn out_of_range_jumps_are_rejected() {
    let mut stream = countdown();
    stream.emit(Instruction::new(Opcode::Jump, AddressingMode::Absolute, 99i64));
    assert!(encode_file(&stream).is_err());
}

#[test]
fn foreign_headers_are_rejected() {
    let bytes = encode_file(&countdown()).unwrap();
    let mut wrong_magic = bytes.clone();
    wrong_magic[0] = b'X';
    assert!(decode_file(&wrong_magic).is_err());

    let mut wrong_version = bytes;
    wrong_version[4] = 9;
    let err = decode_file(&wrong_version).unwrap_err();
    assert!(err.to_string().contains("unsupported bytecode version"));
    assert!(decode_file(b"FPS").is_err());
}
