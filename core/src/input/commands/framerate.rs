//! The `Framerate` command: override the simulation rate
//!
//! Validated while parsing so a typo surfaces before playback starts, then
//! applied to the host when the cursor reaches the command's frame.

use crate::input::commands::{
    Command, CommandInfo, CommandRegistry, ExecuteTiming, ParseContext, RuntimeContext,
};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(
        CommandInfo::new("Framerate", ExecuteTiming::PARSE | ExecuteTiming::RUNTIME)
            .on_parse(validate)
            .on_runtime(apply),
    );
}

fn validate(ctx: &mut ParseContext<'_>, command: &Command) {
    if command.args.len() != 1 {
        ctx.controller.abort.abort(format!(
            "Invalid number of arguments in framerate command: '{}'.",
            command.line_text
        ));
        return;
    }
    if command.args[0].parse::<f32>().is_err() {
        ctx.controller
            .abort
            .abort(format!("Not a valid number: '{}'.", command.args[0]));
    }
}

fn apply(ctx: &mut RuntimeContext<'_>, command: &Command) {
    // Bad values were already reported at parse time.
    if let Some(fps) = command.args.first().and_then(|arg| arg.parse::<f32>().ok()) {
        ctx.host.set_framerate(fps);
    }
}
