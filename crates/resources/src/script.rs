//! Shell snippets shared by several resources.

use crate::error::{Error, Result};
use log::debug;
use plan::runner::shell_quote;
use plan::{ApplyContext, Runner};

const UNSET_PROXY: &str = "unset http_proxy https_proxy HTTP_PROXY HTTPS_PROXY";

/// Run `script` with proxy variables unset, for commands that talk to the
/// cluster's own endpoints.
pub fn without_proxy(script: &str) -> String {
    format!("( {UNSET_PROXY} && ( {script} ) )")
}

/// Write `content` to `dst` on the target, creating parent directories.
///
/// The content travels over stdin, so nothing is staged locally.
pub fn write_file(
    ctx: &ApplyContext,
    runner: &dyn Runner,
    content: &[u8],
    dst: &str,
    mode: u32,
) -> Result<()> {
    let quoted = shell_quote(dst);
    let cmd = format!(
        "mkdir -pv \"$(dirname {quoted})\" && sed -n {} && chmod {mode:04o} {quoted}",
        shell_quote(&format!("w {dst}"))
    );
    runner
        .run_command(ctx, &cmd, Some(content))
        .map_err(|e| Error::command(&cmd, e))?;
    Ok(())
}

/// `rm -f` a file on the target
pub fn remove_file(ctx: &ApplyContext, runner: &dyn Runner, path: &str) -> Result<()> {
    let cmd = format!("rm -f {}", shell_quote(path));
    if let Err(e) = runner.run_command(ctx, &cmd, None) {
        debug!("failed to delete {path}: {}", e.output());
        return Err(Error::command(cmd, e));
    }
    Ok(())
}
