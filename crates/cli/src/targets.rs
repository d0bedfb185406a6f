//! Build targets of this repository.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use brique_lib::archive::{self, ArchiveKind, Level};
use brique_lib::target::Callback;
use brique_lib::{BuildContext, Fileset, Os, Result, remove, tools};

/// Name of the binary built and shipped by `bin` and `dist`.
const BINARY: &str = "b";

/// Where `dist` puts its archives.
const DIST_DIR: &str = "dist";

/// Build output directory.
const TARGET_DIR: &str = "target";

/// Every target, the default first.
pub fn all() -> Vec<(String, String, Callback)> {
  vec![
    target("all", "runs the tests and builds the binaries", |ctx| ctx.run(&["test", "bin"])),
    target("test", "runs the tests", test),
    target("bin", "builds the binaries", bin),
    target("dist", "packages the binaries", dist),
    target("clean", "removes build and dist outputs", clean),
  ]
}

fn target<F>(name: &str, description: &str, callback: F) -> (String, String, Callback)
where
  F: Fn(&BuildContext) -> Result<()> + Send + Sync + 'static,
{
  (name.to_string(), description.to_string(), Arc::new(callback))
}

fn test(ctx: &BuildContext) -> Result<()> {
  let cargo = ctx.tool(&tools::cargo())?;
  cargo.run(ctx, &["test", "--workspace"])?;
  Ok(())
}

fn bin(ctx: &BuildContext) -> Result<()> {
  let cargo = ctx.tool(&tools::cargo())?;
  let cross = ctx.config().cross;
  ctx.for_each_platform(|os| {
    let mut args = vec!["build", "--release", "--bin", BINARY];
    if cross {
      args.extend(["--target", rust_target(os)]);
    }
    cargo.run(ctx, &args)?;
    Ok(())
  })
}

fn dist(ctx: &BuildContext) -> Result<()> {
  bin(ctx)?;
  let version = match tools::describe(ctx)? {
    version if version.is_empty() => "dev".to_string(),
    version => version,
  };
  let cross = ctx.config().cross;
  ctx.for_each_platform(|os| {
    let release = if cross {
      PathBuf::from(TARGET_DIR).join(rust_target(os)).join("release")
    } else {
      PathBuf::from(TARGET_DIR).join("release")
    };
    let binary = format!("{BINARY}{}", os.exe_suffix());
    let destination = format!("{DIST_DIR}/{BINARY}-{version}-{os}.tar.gz");
    archive::write(
      ArchiveKind::Tar { gzip: true },
      &destination,
      Level::Default,
      &[Fileset::in_dir(release).include(binary)],
      &mut io::stdout(),
    )
  })
}

fn clean(_ctx: &BuildContext) -> Result<()> {
  remove(&[Fileset::of([TARGET_DIR, DIST_DIR])])
}

fn rust_target(os: Os) -> &'static str {
  match os {
    Os::Linux => "x86_64-unknown-linux-musl",
    Os::MacOs => "x86_64-apple-darwin",
    Os::Windows => "x86_64-pc-windows-gnu",
  }
}
