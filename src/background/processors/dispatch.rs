use anyhow::{Context, Result, anyhow};
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::{ProcessingHandle, Step};
use crate::registry::Instruction;

type InstructionFn = fn(&mut dyn ProcessingHandle, &[Value]) -> Result<Step>;

// Instruction names the backend understands natively. Anything else is
// forwarded to `ProcessingHandle::passthru` untouched.
static DISPATCH: LazyLock<HashMap<&'static str, InstructionFn>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, InstructionFn> = HashMap::new();
    table.insert("convert", |h, args| h.convert(arg_str(args, 0, "convert")?));
    table.insert("fit", |h, args| {
        let (w, h_) = size_args(args, "fit")?;
        h.fit(w, h_).map(step)
    });
    table.insert("fitCrop", |h, args| {
        let (w, h_) = size_args(args, "fitCrop")?;
        h.fit_crop(w, h_).map(step)
    });
    table.insert("zoomCrop", |h, args| {
        let (w, h_) = size_args(args, "zoomCrop")?;
        h.zoom_crop(w, h_).map(step)
    });
    table.insert("strip", |h, _| h.strip().map(step));
    table.insert("compress", |h, args| {
        h.compress(arg_f64(args, 0, "compress")?).map(step)
    });
    table.insert("colorDepth", |h, args| {
        h.color_depth(arg_u32(args, 0, "colorDepth")?).map(step)
    });
    table.insert("rotate", |h, args| {
        h.rotate(arg_i32(args, 0, "rotate")?).map(step)
    });
    table.insert("background", |h, args| {
        h.background(arg_str(args, 0, "background")?).map(step)
    });
    table.insert("interlace", |h, args| {
        let enabled = args.first().and_then(Value::as_bool).unwrap_or(true);
        h.interlace(enabled).map(step)
    });
    table
});

fn step(ok: bool) -> Step {
    if ok { Step::Continue } else { Step::Abort }
}

/// Run `instructions` in declaration order.
///
/// Returns the handle that is active after the last instruction, or `None`
/// as soon as one instruction reports failure.
pub fn apply_instructions(
    mut handle: Box<dyn ProcessingHandle>,
    instructions: &[Instruction],
) -> Result<Option<Box<dyn ProcessingHandle>>> {
    for instruction in instructions {
        let result = match DISPATCH.get(instruction.name.as_str()) {
            Some(function) => function(handle.as_mut(), &instruction.args),
            None => handle
                .passthru(&instruction.name, &instruction.args)
                .map(step),
        }
        .with_context(|| format!("instruction `{}` failed", instruction.name))?;

        match result {
            Step::Continue => {}
            Step::Replace(next) => {
                debug!(
                    "`{}` switched the active handle from {} to {}",
                    instruction.name,
                    handle.name(),
                    next.name()
                );
                handle = next;
            }
            Step::Abort => {
                debug!("`{}` returned false, aborting", instruction.name);
                return Ok(None);
            }
        }
    }
    Ok(Some(handle))
}

// ────────────────────────────────────────────────────────────────
// Argument helpers
// ────────────────────────────────────────────────────────────────

fn arg<'a>(args: &'a [Value], index: usize, op: &str) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| anyhow!("`{}` expects an argument at position {}", op, index))
}

fn arg_str<'a>(args: &'a [Value], index: usize, op: &str) -> Result<&'a str> {
    arg(args, index, op)?
        .as_str()
        .ok_or_else(|| anyhow!("`{}` argument {} must be a string", op, index))
}

fn arg_f64(args: &[Value], index: usize, op: &str) -> Result<f64> {
    arg(args, index, op)?
        .as_f64()
        .ok_or_else(|| anyhow!("`{}` argument {} must be a number", op, index))
}

fn arg_i32(args: &[Value], index: usize, op: &str) -> Result<i32> {
    let value = arg(args, index, op)?
        .as_i64()
        .ok_or_else(|| anyhow!("`{}` argument {} must be an integer", op, index))?;
    i32::try_from(value).with_context(|| format!("`{}` argument {} out of range", op, index))
}

fn arg_u32(args: &[Value], index: usize, op: &str) -> Result<u32> {
    let value = arg(args, index, op)?
        .as_u64()
        .ok_or_else(|| anyhow!("`{}` argument {} must be a positive integer", op, index))?;
    u32::try_from(value).with_context(|| format!("`{}` argument {} out of range", op, index))
}

/// `[width, height]`; a single value means a square box.
fn size_args(args: &[Value], op: &str) -> Result<(u32, u32)> {
    let width = arg_u32(args, 0, op)?;
    let height = if args.len() > 1 { arg_u32(args, 1, op)? } else { width };
    Ok((width, height))
}
