//! Built-in tool definitions and git helpers.

use crate::context::BuildContext;
use crate::error::Result;
use crate::tool::ToolSpec;

/// Alpine release used by the built-in images.
pub const ALPINE_VERSION: &str = "3.20";

/// Rust release used by the `cargo` image.
pub const RUST_VERSION: &str = "1.85";

pub fn git() -> ToolSpec {
  ToolSpec::new("git", "--version")
    .url("https://git-scm.com/")
    .instructions(format!("FROM alpine:{ALPINE_VERSION}\nRUN apk add --no-cache git\n"))
}

/// The container engine itself. It has no image: it can only run locally.
pub fn docker() -> ToolSpec {
  ToolSpec::new("docker", "--version").url("https://www.docker.com")
}

pub fn jq() -> ToolSpec {
  ToolSpec::new("jq", "--help")
    .url("https://jqlang.github.io/jq")
    .instructions(format!("FROM alpine:{ALPINE_VERSION}\nRUN apk add --no-cache jq\n"))
}

pub fn cargo() -> ToolSpec {
  ToolSpec::new("cargo", "--version")
    .url("https://rustup.rs")
    .instructions(format!(
      "FROM rust:{RUST_VERSION}-alpine{ALPINE_VERSION}\nRUN apk add --no-cache musl-dev\n"
    ))
}

/// Abbreviated hash of `HEAD`, empty outside a repository.
#[track_caller]
pub fn short_commit(ctx: &BuildContext) -> Result<String> {
  git_output(ctx, &["rev-parse", "--short", "HEAD"])
}

/// Full hash of `HEAD`, empty outside a repository.
#[track_caller]
pub fn commit(ctx: &BuildContext) -> Result<String> {
  git_output(ctx, &["rev-parse", "HEAD"])
}

/// `git describe --always --dirty`, empty outside a repository.
#[track_caller]
pub fn describe(ctx: &BuildContext) -> Result<String> {
  git_output(ctx, &["describe", "--always", "--dirty"])
}

/// Release tags (`v*`) pointing at `HEAD`, one per line. Empty when untagged.
#[track_caller]
pub fn version(ctx: &BuildContext) -> Result<String> {
  git_output(ctx, &["tag", "-l", "--points-at", "HEAD", "v*"])
}

/// Whether tracked files differ from `HEAD`.
#[track_caller]
pub fn is_dirty(ctx: &BuildContext) -> Result<bool> {
  let git = ctx.tool(&git())?;
  git.run(ctx, &["update-index", "-q", "--refresh"])?;
  let code = git.with_success().run(ctx, &["diff-index", "--quiet", "HEAD", "--", "."])?;
  Ok(code != 0)
}

#[track_caller]
fn git_output(ctx: &BuildContext, args: &[&str]) -> Result<String> {
  ctx.tool(&git())?.with_success().capture(ctx, args)
}
