//! Command line front end of simdport.
//!
//! Translates each C source file into `<stem>_<goos>_<goarch>.s` and `.go` in the
//! output directory. Every failed function is listed as
//! `file:line:col: error[Kind]: message`, and the exit status is 1 if any failed.

use bumpalo::Bump;
use clap::Parser;
use simdport::config::{SharingPolicy, TranslatorConfig};
use simdport::core::{Arch, ClangCompiler, TargetOs, TranslationSession, Translator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "simdport", version, about = "Translate SIMD intrinsic C to Go assembly")]
struct Cli {
    /// C source files, one translation unit each
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long = "output", default_value = ".")]
    output: PathBuf,

    /// Target architecture (amd64, arm64)
    #[arg(short = 't', long = "target", default_value = "amd64")]
    target: Arch,

    /// Go operating system recorded in names and headers (linux, darwin)
    #[arg(long = "target-os")]
    target_os: Option<TargetOs>,

    /// Machine option passed to the compiler as -m<OPTION>
    #[arg(short = 'm', long = "machine-option")]
    machine_options: Vec<String>,

    /// Extra compiler option passed through unmodified
    #[arg(short = 'e', long = "extra-option", allow_hyphen_values = true)]
    extra_options: Vec<String>,

    /// Optimization level
    #[arg(short = 'O', long = "optimize", default_value = "3")]
    optimize: String,

    /// Include directory
    #[arg(short = 'I', long = "include")]
    include_paths: Vec<PathBuf>,

    /// Native compiler program
    #[arg(long = "cc", default_value = "clang")]
    compiler: String,

    /// Per-invocation compiler timeout in seconds
    #[arg(long = "timeout", default_value_t = 60)]
    timeout: u64,

    /// What to do with constants shared between functions (duplicate, exclusive)
    #[arg(long = "constant-policy", default_value = "duplicate")]
    constant_policy: SharingPolicy,

    /// Go package of the generated declarations
    #[arg(long = "package", default_value = "main")]
    package: String,

    /// Log pipeline steps
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> TranslatorConfig {
        let mut config = TranslatorConfig::new(self.target)
            .with_compiler(&self.compiler)
            .with_optimize(&self.optimize)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_sharing_policy(self.constant_policy)
            .with_package(&self.package)
            .with_output_dir(&self.output);
        if let Some(os) = self.target_os {
            config = config.with_target_os(os);
        }
        for option in &self.machine_options {
            config = config.with_machine_option(option);
        }
        for option in &self.extra_options {
            config = config.with_extra_option(option);
        }
        for path in &self.include_paths {
            config = config.with_include_path(path);
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = cli.config();
    let compiler = ClangCompiler::new(&config.compiler);
    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let translator = Translator::new(&compiler, &config);

    let reports = match translator.translate_files(&session, &cli.sources) {
        Ok(reports) => reports,
        Err(err) => {
            eprintln!("simdport: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for report in &reports {
        if let Some(err) = &report.unit_error {
            eprintln!("{}: error: {err}", report.source.display());
            failed = true;
        }
        for failure in &report.failures {
            eprintln!("{failure}");
            failed = true;
        }
    }
    if reports.len() < cli.sources.len() {
        for skipped in &cli.sources[reports.len()..] {
            eprintln!("{}: skipped after stub mismatch", skipped.display());
        }
        failed = true;
    }
    log::info!("{}", session.stats());

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
