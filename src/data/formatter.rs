// ============================================================
// Layer 4 — Prompt Formatter
// ============================================================
// Turns a Record into the (prompt, target) text pair.
//
// Two prompt shapes, chosen by whether `input` has any
// non-whitespace content:
//
//   Instruction: Translate to French
//   Input: Hello
//   Answer:
//
//   Instruction: Summarize
//   Answer:
//
// The target is always the record's `output`, unchanged.
// Empty instructions or outputs are passed through as-is.

use crate::domain::record::{FormattedExample, Record};

/// The cue every prompt ends with
pub const ANSWER_CUE: &str = "Answer:";

pub fn format_example(record: &Record) -> FormattedExample {
    let prompt = if record.has_input() {
        format!(
            "Instruction: {}\nInput: {}\n{ANSWER_CUE}",
            record.instruction, record.input
        )
    } else {
        format!("Instruction: {}\n{ANSWER_CUE}", record.instruction)
    };

    FormattedExample {
        prompt,
        target: record.output.clone(),
    }
}
