//! Call stack capture for query records.

use backtrace::Backtrace;

use super::StackFrame;

/// Source path of this module, where every captured stack is cut
pub(crate) const STACK_FILE: &str = file!();

/// Resolve the current call stack, outermost frame first.
///
/// Frames inside this module and the unwinder are cut off. Frames without debug info are skipped;
/// `callsite` is appended as the innermost frame unless the resolved stack already holds it, so
/// the stack is never empty.
pub(crate) fn capture_stack(callsite: StackFrame) -> Vec<StackFrame> {
    let backtrace = Backtrace::new();
    let mut frames: Vec<StackFrame> = backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .filter_map(|symbol| {
            let file = symbol.filename()?;
            Some(StackFrame::new(file.display().to_string(), symbol.lineno()?))
        })
        .skip_while(|frame| !frame.file.ends_with(STACK_FILE))
        .skip_while(|frame| frame.file.ends_with(STACK_FILE))
        .collect();
    frames.reverse();

    let resolved = frames
        .iter()
        .any(|frame| frame.line == callsite.line && frame.file.ends_with(&callsite.file));
    if !resolved {
        frames.push(callsite);
    }
    frames
}
