//! External tools, run on the host or inside a container.
//!
//! A tool is resolved once per [`BuildContext`]: the first resolution probes the host by
//! running `<name> <check>`. When that works the tool runs locally; when the executable cannot
//! be started a container image is built from the tool's Dockerfile instructions and every
//! later invocation runs inside a disposable container of that image.

use std::path::PathBuf;
use std::panic::Location;
use std::sync::Arc;

use tracing::{debug, info};

use crate::archive;
use crate::context::BuildContext;
use crate::error::{BuildError, ErrorKind, Located, Result};
use crate::process::{Input, Invocation, Output};

/// Name of the build recipe inside the image build context.
const DOCKERFILE: &str = "Dockerfile";

/// Marker between the root identifier and the tool names in image tags.
const IMAGE_MARKER: &str = "-build-";

/// Where the working directory is mounted inside containers, followed by the root identifier.
const MOUNT_PREFIX: &str = "/src/";

/// Declarative description of a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSpec {
  /// Executable name.
  pub name: String,
  /// Argument used to probe the executable, such as `--version`.
  pub check: String,
  /// Where to get the tool, shown when it has to run in a container.
  pub url: String,
  /// Dockerfile body producing an image that provides the executable.
  pub instructions: String,
}

impl ToolSpec {
  pub fn new(name: impl Into<String>, check: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      check: check.into(),
      ..Self::default()
    }
  }

  pub fn url(mut self, url: impl Into<String>) -> Self {
    self.url = url.into();
    self
  }

  pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
    self.instructions = instructions.into();
    self
  }
}

/// How a tool is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Local,
  Container { image: String },
}

#[derive(Debug)]
struct Core {
  name: String,
  url: String,
  instructions: String,
  names: String,
  mode: Mode,
}

/// A resolved tool.
///
/// Cheap to clone. Option methods return new values and leave the cached tool untouched.
#[derive(Debug, Clone)]
pub struct Tool {
  core: Arc<Core>,
  env: Vec<(String, String)>,
  tolerate_failure: bool,
}

/// Per-invocation options for [`Tool::run_with`].
#[derive(Debug, Default)]
pub struct RunOptions<'a> {
  /// Added after the tool's own environment overrides.
  pub environment: Vec<(String, String)>,
  /// Directory to run in, the current directory when unset.
  pub working_directory: Option<PathBuf>,
  pub output: Output<'a>,
  pub input: Input<'a>,
  /// Return non-zero exit codes instead of failing the build.
  pub tolerate_failure: bool,
}

impl BuildContext {
  /// Resolve a tool, probing the host and building its image on first use.
  ///
  /// The context lock is held for the whole first resolution, so concurrent callers asking for
  /// the same tool wait for it instead of building the image twice.
  #[track_caller]
  pub fn tool(&self, spec: &ToolSpec) -> Result<Tool> {
    let caller = Location::caller();
    let mut state = self.lock();
    if let Some(tool) = state.tools.get(&spec.name) {
      return Ok(tool.clone());
    }

    let tool = Tool::resolve(self, state.root.as_deref(), spec).located(caller)?;
    state.tools.insert(spec.name.clone(), tool.clone());
    Ok(tool)
  }

  /// A plain host command, never probed, cached or containerized.
  pub fn command(&self, name: impl Into<String>) -> Tool {
    let name = name.into();
    Tool {
      core: Arc::new(Core {
        names: name.clone(),
        name,
        url: String::new(),
        instructions: String::new(),
        mode: Mode::Local,
      }),
      env: Vec::new(),
      tolerate_failure: false,
    }
  }
}

impl Tool {
  fn resolve(ctx: &BuildContext, root: Option<&str>, spec: &ToolSpec) -> Result<Self> {
    let containerize = probe(ctx, spec)?;
    let config = ctx.config();

    if containerize && !spec.name.is_empty() && !spec.url.is_empty() && !config.force_containers {
      info!(
        tool = %spec.name,
        "missing {}: consider installing it to speed up the build, see {}", spec.name, spec.url
      );
    }

    let mode = if containerize {
      Mode::Container {
        image: build_image(ctx, root, &spec.name, &spec.name, &spec.instructions)?,
      }
    } else {
      Mode::Local
    };

    Ok(Self {
      core: Arc::new(Core {
        name: spec.name.clone(),
        url: spec.url.clone(),
        instructions: spec.instructions.clone(),
        names: spec.name.clone(),
        mode,
      }),
      env: Vec::new(),
      tolerate_failure: false,
    })
  }

  pub fn name(&self) -> &str {
    &self.core.name
  }

  /// Composite label of this tool and the tools combined into it.
  pub fn names(&self) -> &str {
    &self.core.names
  }

  pub fn url(&self) -> &str {
    &self.core.url
  }

  pub fn instructions(&self) -> &str {
    &self.core.instructions
  }

  pub fn mode(&self) -> &Mode {
    &self.core.mode
  }

  pub fn is_containerized(&self) -> bool {
    matches!(self.core.mode, Mode::Container { .. })
  }

  /// Add an environment override.
  pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
    let mut tool = self.clone();
    tool.env.push((key.into(), value.into()));
    tool
  }

  /// Return non-zero exit codes instead of failing the build.
  pub fn with_success(&self) -> Self {
    Self {
      tolerate_failure: true,
      ..self.clone()
    }
  }

  /// Merge another tool into this one.
  ///
  /// Dockerfile instructions are concatenated. When either side runs in a container the result
  /// does too, with an image built for the combined names.
  #[track_caller]
  pub fn combine(&self, ctx: &BuildContext, other: &Tool) -> Result<Tool> {
    let caller = Location::caller();
    let instructions = format!("{}\n{}", self.core.instructions, other.core.instructions);

    let (names, mode) = if self.is_containerized() || other.is_containerized() {
      let names = format!("{}-{}", self.core.names, other.core.name);
      let root = ctx.root();
      let image = build_image(ctx, root.as_deref(), &self.core.name, &names, &instructions).located(caller)?;
      (names, Mode::Container { image })
    } else {
      (self.core.names.clone(), Mode::Local)
    };

    Ok(Self {
      core: Arc::new(Core {
        name: self.core.name.clone(),
        url: self.core.url.clone(),
        instructions,
        names,
        mode,
      }),
      env: self.env.clone(),
      tolerate_failure: self.tolerate_failure,
    })
  }

  /// Run the tool with default options and return its exit code.
  #[track_caller]
  pub fn run(&self, ctx: &BuildContext, args: &[&str]) -> Result<i32> {
    self.run_with(ctx, args, RunOptions::default())
  }

  /// Run the tool and return its standard output, without the trailing newline.
  #[track_caller]
  pub fn capture(&self, ctx: &BuildContext, args: &[&str]) -> Result<String> {
    let mut buffer = Vec::new();
    self.run_with(
      ctx,
      args,
      RunOptions {
        output: Output::Capture(&mut buffer),
        ..RunOptions::default()
      },
    )?;
    let text = String::from_utf8_lossy(&buffer);
    Ok(text.strip_suffix('\n').unwrap_or(&text).to_string())
  }

  /// Run the tool and return its exit code.
  ///
  /// A non-zero exit fails the build unless failure is tolerated by the tool or the options.
  #[track_caller]
  pub fn run_with(&self, ctx: &BuildContext, args: &[&str], options: RunOptions<'_>) -> Result<i32> {
    let caller = Location::caller();
    let tolerate = self.tolerate_failure || options.tolerate_failure;
    let mut env = self.env.clone();
    env.extend(options.environment);

    let invocation = match &self.core.mode {
      Mode::Local => {
        debug!(tool = %self.core.name, ?args, "running");
        Invocation::new(&self.core.name)
          .args(args.iter().copied())
          .env(env)
          .cwd(options.working_directory)
      }
      Mode::Container { image } => {
        debug!(tool = %self.core.name, ?args, "running (container)");
        self.container_invocation(ctx, image, args, env, options.working_directory).located(caller)?
      }
    };

    // Containers keep stderr so engine failures stay visible.
    let quiet = tolerate && matches!(self.core.mode, Mode::Local);
    let invocation = invocation
      .stdin(options.input)
      .stdout(options.output)
      .stderr(if quiet { Output::Null } else { Output::Inherit });

    let code = ctx.runner().run(invocation).located(caller)?;
    if code != 0 && !tolerate {
      return Err(
        BuildError::new(ErrorKind::ToolFailed {
          tool: self.core.name.clone(),
          code,
        })
        .at(caller),
      );
    }
    Ok(code)
  }

  fn container_invocation<'a>(
    &self,
    ctx: &BuildContext,
    image: &str,
    args: &[&str],
    env: Vec<(String, String)>,
    working_directory: Option<PathBuf>,
  ) -> Result<Invocation<'a>> {
    let root = ctx
      .root()
      .filter(|root| !root.is_empty())
      .ok_or_else(|| ErrorKind::MissingRootId {
        tool: self.core.name.clone(),
      })?;
    let cwd = match working_directory {
      Some(dir) => std::path::absolute(dir)?,
      None => std::env::current_dir()?,
    };
    // Engines reject verbatim `\\?\` paths in volume specs.
    let cwd = dunce::simplified(&cwd);
    let mount = mount_point(&root);

    let mut engine_args = vec![
      "run".to_string(),
      "--rm".to_string(),
      "-v".to_string(),
      format!("{}:{}", cwd.display(), mount),
      "-w".to_string(),
      mount,
      "-i".to_string(),
    ];
    for (key, value) in env {
      engine_args.push("-e".to_string());
      engine_args.push(format!("{key}={value}"));
    }
    engine_args.push(image.to_string());
    engine_args.push(self.core.name.clone());
    engine_args.extend(args.iter().map(|arg| arg.to_string()));

    Ok(Invocation::new(&ctx.config().engine).args(engine_args))
  }
}

/// Decide whether a tool has to run in a container.
fn probe(ctx: &BuildContext, spec: &ToolSpec) -> Result<bool> {
  debug!(tool = %spec.name, "checking for tool");
  if spec.check.is_empty() {
    return Err(BuildError::new(ErrorKind::MissingCheck {
      tool: spec.name.clone(),
    }));
  }

  let invocation = Invocation::new(&spec.name)
    .arg(&spec.check)
    .stdin(Input::Null)
    .stdout(Output::Null)
    .stderr(Output::Null);

  match ctx.runner().run(invocation) {
    Ok(0) => Ok(ctx.config().force_containers),
    Ok(code) => Err(BuildError::new(ErrorKind::CheckFailed {
      tool: spec.name.clone(),
      code,
    })),
    Err(err) if matches!(err.kind(), ErrorKind::Spawn { .. }) => {
      debug!(tool = %spec.name, %err, "tool not available on the host");
      Ok(true)
    }
    Err(err) => Err(err),
  }
}

/// Build the container image for `names` and return its tag.
fn build_image(ctx: &BuildContext, root: Option<&str>, tool: &str, names: &str, instructions: &str) -> Result<String> {
  let root = root
    .filter(|root| !root.is_empty())
    .ok_or_else(|| ErrorKind::MissingRootId { tool: tool.to_string() })?;
  let image = image_name(root, names);
  let build_context = archive::single_file(DOCKERFILE, instructions.as_bytes(), 0o600)?;

  info!(tool = %tool, image = %image, "building image");
  let invocation = Invocation::new(&ctx.config().engine)
    .args(["build", "-t", image.as_str(), "-"])
    .stdin(Input::Bytes(&build_context))
    .stdout(if ctx.config().verbose { Output::Inherit } else { Output::Null })
    .stderr(Output::Inherit);

  let code = ctx.runner().run(invocation)?;
  if code != 0 {
    return Err(BuildError::new(ErrorKind::ImageBuildFailed {
      tool: tool.to_string(),
      image,
      code,
    }));
  }
  Ok(image)
}

/// Image tag for a set of tool names: `<root with separators as dashes>-build-<names>`.
pub fn image_name(root: &str, names: &str) -> String {
  format!("{}{IMAGE_MARKER}{names}", root.replace(['/', '\\'], "-"))
}

fn mount_point(root: &str) -> String {
  format!("{MOUNT_PREFIX}{root}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Config;
  use crate::util::testutil::{RecordingRunner, shell_cmd};

  fn gcc_spec() -> ToolSpec {
    ToolSpec::new("gcc", "--version")
      .url("https://gcc.gnu.org")
      .instructions("FROM alpine:3.20\nRUN apk add --no-cache gcc")
  }

  fn context(runner: &Arc<RecordingRunner>, config: Config) -> BuildContext {
    let ctx = BuildContext::with_runner(config, Arc::clone(runner) as Arc<_>);
    ctx.init("github.com/acme/widget").unwrap();
    ctx
  }

  #[test]
  fn image_name_replaces_separators() {
    assert_eq!(
      image_name("github.com/acme/widget", "go-jq"),
      "github.com-acme-widget-build-go-jq"
    );
  }

  #[test]
  fn installed_tool_runs_locally() {
    let runner = Arc::new(RecordingRunner::default());
    let ctx = context(&runner, Config::default());

    let tool = ctx.tool(&gcc_spec()).unwrap();

    assert_eq!(tool.mode(), &Mode::Local);
    assert_eq!(runner.commands(), vec!["gcc --version"]);
  }

  #[test]
  fn missing_tool_builds_image_once() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = context(&runner, Config::default());

    let first = ctx.tool(&gcc_spec()).unwrap();
    let second = ctx.tool(&gcc_spec()).unwrap();

    let image = "github.com-acme-widget-build-gcc".to_string();
    assert_eq!(first.mode(), &Mode::Container { image: image.clone() });
    assert_eq!(second.mode(), &Mode::Container { image: image.clone() });
    assert_eq!(
      runner.commands(),
      vec!["gcc --version".to_string(), format!("docker build -t {image} -")]
    );
  }

  #[test]
  fn image_build_receives_dockerfile_archive() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = context(&runner, Config::default());

    ctx.tool(&gcc_spec()).unwrap();

    let stdin = runner.last_stdin();
    let mut archive = tar::Archive::new(stdin.as_slice());
    let mut entries = archive.entries().unwrap();
    let mut entry = entries.next().unwrap().unwrap();
    assert_eq!(entry.path().unwrap().to_str(), Some("Dockerfile"));
    assert_eq!(entry.header().mode().unwrap(), 0o600);
    let mut content = String::new();
    std::io::Read::read_to_string(&mut entry, &mut content).unwrap();
    assert_eq!(content, gcc_spec().instructions);
    assert!(entries.next().is_none());
  }

  #[test]
  fn forced_containers_skip_local_tool() {
    let runner = Arc::new(RecordingRunner::default());
    let config = Config {
      force_containers: true,
      ..Config::default()
    };
    let ctx = context(&runner, config);

    let tool = ctx.tool(&gcc_spec()).unwrap();

    assert!(tool.is_containerized());
    assert_eq!(runner.commands().len(), 2);
  }

  #[test]
  fn failing_check_is_fatal() {
    let runner = Arc::new(RecordingRunner::default().exit("gcc", 2));
    let ctx = context(&runner, Config::default());

    let err = ctx.tool(&gcc_spec()).unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::CheckFailed { code: 2, .. }));
  }

  #[test]
  fn empty_check_is_fatal_before_probing() {
    let runner = Arc::new(RecordingRunner::default());
    let ctx = context(&runner, Config::default());

    let err = ctx.tool(&ToolSpec::new("gcc", "")).unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::MissingCheck { .. }));
    assert!(runner.commands().is_empty());
  }

  #[test]
  fn failed_image_build_is_fatal() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc").exit("docker", 1));
    let ctx = context(&runner, Config::default());

    let err = ctx.tool(&gcc_spec()).unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::ImageBuildFailed { .. }));
  }

  #[test]
  fn container_image_needs_root() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = BuildContext::with_runner(Config::default(), Arc::clone(&runner) as Arc<_>);

    let err = ctx.tool(&gcc_spec()).unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::MissingRootId { .. }));
  }

  #[test]
  fn container_image_needs_non_empty_root() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = BuildContext::with_runner(Config::default(), Arc::clone(&runner) as Arc<_>);
    ctx.init("").unwrap();

    let err = ctx.tool(&gcc_spec()).unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::MissingRootId { tool } if tool == "gcc"));
    assert_eq!(runner.commands(), vec!["gcc --version"]);
  }

  #[test]
  fn container_run_needs_non_empty_root() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let resolved = context(&runner, Config::default());
    let tool = resolved.tool(&gcc_spec()).unwrap();
    let ctx = BuildContext::with_runner(Config::default(), Arc::clone(&runner) as Arc<_>);
    ctx.init("").unwrap();

    let err = tool.run(&ctx, &["-v"]).unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::MissingRootId { tool } if tool == "gcc"));
    assert!(!runner.commands().iter().any(|command| command.starts_with("docker run")));
  }

  #[test]
  fn container_run_mounts_working_directory() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = context(&runner, Config::default());
    let tool = ctx.tool(&gcc_spec()).unwrap().with_env("CC", "gcc");

    tool
      .run_with(
        &ctx,
        &["-c", "main.c"],
        RunOptions {
          working_directory: Some(PathBuf::from("/work/widget")),
          environment: vec![("CFLAGS".to_string(), "-O2".to_string())],
          ..RunOptions::default()
        },
      )
      .unwrap();

    assert_eq!(
      runner.commands().last().unwrap(),
      "docker run --rm -v /work/widget:/src/github.com/acme/widget -w /src/github.com/acme/widget -i \
       -e CC=gcc -e CFLAGS=-O2 github.com-acme-widget-build-gcc gcc -c main.c"
    );
  }

  #[test]
  fn with_env_does_not_touch_cache() {
    let runner = Arc::new(RecordingRunner::default());
    let ctx = context(&runner, Config::default());

    let configured = ctx.tool(&gcc_spec()).unwrap().with_env("CC", "clang");
    configured.run(&ctx, &["-v"]).unwrap();
    ctx.tool(&gcc_spec()).unwrap().run(&ctx, &["-v"]).unwrap();

    let envs = runner.envs();
    assert_eq!(envs[1], vec![("CC".to_string(), "clang".to_string())]);
    assert!(envs[2].is_empty());
  }

  #[test]
  fn non_zero_exit_is_fatal_unless_tolerated() {
    let runner = Arc::new(RecordingRunner::default().exit("false", 1));
    let ctx = context(&runner, Config::default());
    let tool = ctx.command("false");

    let line = line!() + 1;
    let err = tool.run(&ctx, &[]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ToolFailed { code: 1, .. }));
    assert_eq!(err.location().line(), line);

    assert_eq!(tool.with_success().run(&ctx, &[]).unwrap(), 1);
    let tolerant = RunOptions {
      tolerate_failure: true,
      ..RunOptions::default()
    };
    assert_eq!(tool.run_with(&ctx, &[], tolerant).unwrap(), 1);
  }

  #[test]
  fn tolerant_run_keeps_container_stderr() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = context(&runner, Config::default());
    let container = ctx.tool(&gcc_spec()).unwrap().with_success();
    let local = ctx.command("make").with_success();

    container.run(&ctx, &["-v"]).unwrap();
    local.run(&ctx, &["-v"]).unwrap();

    let quiet = runner.quiet_stderr();
    assert_eq!(&quiet[quiet.len() - 2..], [false, true]);
  }

  #[test]
  fn combine_local_tools_stays_local() {
    let runner = Arc::new(RecordingRunner::default());
    let ctx = context(&runner, Config::default());
    let gcc = ctx.tool(&gcc_spec()).unwrap();
    let make = ctx.tool(&ToolSpec::new("make", "--version").instructions("RUN apk add make")).unwrap();

    let combined = gcc.combine(&ctx, &make).unwrap();

    assert!(!combined.is_containerized());
    assert_eq!(combined.names(), "gcc");
    assert_eq!(combined.instructions(), format!("{}\nRUN apk add make", gcc_spec().instructions));
  }

  #[test]
  fn combine_with_container_tool_rebuilds_image() {
    let runner = Arc::new(RecordingRunner::default().missing("make"));
    let ctx = context(&runner, Config::default());
    let gcc = ctx.tool(&gcc_spec()).unwrap();
    let make = ctx.tool(&ToolSpec::new("make", "--version")).unwrap();

    let combined = gcc.combine(&ctx, &make).unwrap();

    assert_eq!(combined.names(), "gcc-make");
    assert_eq!(
      combined.mode(),
      &Mode::Container {
        image: "github.com-acme-widget-build-gcc-make".to_string()
      }
    );
    assert_eq!(
      runner.commands().last().unwrap(),
      "docker build -t github.com-acme-widget-build-gcc-make -"
    );
  }

  #[test]
  fn capture_strips_trailing_newline() {
    let ctx = BuildContext::new(Config::default());
    let (shell, args) = shell_cmd("echo captured");
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let output = ctx.command(shell).capture(&ctx, &args).unwrap();

    assert_eq!(output.trim_end_matches('\r'), "captured");
  }

  #[tracing_test::traced_test]
  #[test]
  fn missing_tool_suggests_installation() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let ctx = context(&runner, Config::default());

    ctx.tool(&gcc_spec()).unwrap();

    assert!(logs_contain("consider installing it to speed up the build, see https://gcc.gnu.org"));
  }

  #[tracing_test::traced_test]
  #[test]
  fn forced_containers_do_not_suggest_installation() {
    let runner = Arc::new(RecordingRunner::default().missing("gcc"));
    let config = Config {
      force_containers: true,
      ..Config::default()
    };
    let ctx = context(&runner, config);

    ctx.tool(&gcc_spec()).unwrap();

    assert!(!logs_contain("consider installing"));
  }
}
