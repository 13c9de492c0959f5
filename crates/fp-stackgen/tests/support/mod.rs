#![allow(dead_code)]

pub mod builder;
pub mod vm;

use fp_core::diagnostics::Diagnostic;
use fp_core::thir::ThirProgram;
use fp_stackgen::{generate, GeneratedProgram, GeneratorOptions};

use self::vm::{Value, Vm};

pub fn unoptimized() -> GeneratorOptions {
    GeneratorOptions {
        optimize: false,
        ..GeneratorOptions::default()
    }
}

/// Generate a program that must lower without errors.
pub fn generate_ok(program: &ThirProgram, options: &GeneratorOptions) -> GeneratedProgram {
    let report = generate(program, options).expect("generation aborted");
    match report.into_result() {
        Ok((generated, _)) => generated,
        Err(diagnostics) => panic!("unexpected diagnostics: {:#?}", diagnostics),
    }
}

/// Error messages of a program that must fail to lower.
pub fn generate_errors(program: &ThirProgram) -> Vec<Diagnostic> {
    let report = generate(program, &GeneratorOptions::default()).expect("generation aborted");
    assert!(report.value.is_none(), "program lowered without errors");
    report.errors().cloned().collect()
}

/// A VM with the host functions the tests call: `print(int)` and
/// `add(int, int) -> int`.
pub fn host_vm() -> Vm {
    let mut vm = Vm::new();
    vm.register("print", |_| Vec::new());
    vm.register("add", |args| match args {
        [Value::Int(a), Value::Int(b)] => vec![Value::Int(a + b)],
        _ => vec![Value::Int(-1)],
    });
    vm
}

pub fn run_with(program: &ThirProgram, options: &GeneratorOptions) -> Vm {
    let generated = generate_ok(program, options);
    let mut vm = host_vm();
    vm.run(&generated.stream).expect("program trapped");
    assert!(vm.stack().is_empty(), "stack left behind: {:?}", vm.stack());
    vm
}

pub fn run(program: &ThirProgram) -> Vm {
    run_with(program, &GeneratorOptions::default())
}

/// Ints passed to `print`, in call order.
pub fn printed(vm: &Vm) -> Vec<i64> {
    vm.calls_to("print")
        .into_iter()
        .map(|args| match args.as_slice() {
            [Value::Int(value)] => *value,
            other => panic!("print called with {:?}", other),
        })
        .collect()
}
