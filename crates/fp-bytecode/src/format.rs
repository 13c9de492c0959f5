use crate::stream::InstructionStream;

/// Render the stream as text, one instruction per line, prefixed by its index.
/// Comments attached to an instruction are printed on their own lines above it.
pub fn format_stream(stream: &InstructionStream) -> String {
    let width = stream.len().saturating_sub(1).to_string().len().max(4);
    let mut output = String::new();
    output.push_str("fp-stackvm {\n");
    for (index, instruction) in stream.iter() {
        for comment in stream.comments_at(index) {
            output.push_str(&format!("  {:width$}  ; {}\n", "", comment, width = width));
        }
        let marker = if stream.is_pending(index) { " !" } else { "" };
        output.push_str(&format!(
            "  {:>width$}  {}{}\n",
            index.0,
            instruction,
            marker,
            width = width
        ));
    }
    output.push_str("}\n");
    output
}
