//! `interpose specs`: List the compiled-in interception table.

use crate::output::StyledOutput;
use interpose_engine::{InterceptSpec, BUILTIN_INTERCEPTS};

/// Rows of the compiled-in table, in declaration order
pub fn rows() -> &'static [InterceptSpec] {
    BUILTIN_INTERCEPTS
}

pub fn execute(json: bool, out: &mut StyledOutput) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows())?);
        return Ok(());
    }

    for spec in rows() {
        out.bold(spec.class_name);
        out.newline();
        out.field("  methods", &spec.methods.join(", "));
        out.field("  handler", spec.handler_class);
    }
    out.plain(&format!("{} row(s)", rows().len()));
    out.newline();
    out.flush();
    Ok(())
}
