use crate::env::Environment;
use crate::executor::SearchPath;
use argh::FromArgs;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Name used in the prompt and in diagnostics unless overridden.
pub const SHELL_NAME: &str = "shellington";

#[derive(FromArgs, Debug)]
/// An interactive command interpreter with pipes and redirections.
pub struct Args {
    #[argh(option)]
    /// colon-separated directories searched for programs. Defaults to $PATH.
    pub search_path: Option<String>,

    #[argh(option, default = "String::from(SHELL_NAME)")]
    /// name shown in the prompt and in diagnostics.
    pub name: String,

    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status.
    pub command: Option<String>,
}

/// Runtime settings of an [`Interpreter`](crate::Interpreter).
#[derive(Debug, Clone)]
pub struct Config {
    pub shell_name: String,
    pub search_path: SearchPath,
}

impl Config {
    /// Defaults taken from the environment: `PATH`, or the built-in fallback.
    pub fn from_env(env: &Environment) -> Self {
        Self {
            shell_name: SHELL_NAME.to_string(),
            search_path: env
                .get_var("PATH")
                .map(SearchPath::parse)
                .unwrap_or_default(),
        }
    }

    /// Command-line arguments take precedence over the environment.
    pub fn from_args(args: &Args, env: &Environment) -> Self {
        let mut config = Self::from_env(env);
        config.shell_name = args.name.clone();
        if let Some(dirs) = &args.search_path {
            config.search_path = SearchPath::parse(dirs);
        }
        config
    }
}

/// Subscriber for diagnostics: filtered by `RUST_LOG`, warnings and up
/// otherwise, coloured only when `ansi` is set.
pub fn log_subscriber<W>(
    writer: W,
    ansi: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .without_time()
        .with_target(false)
        .finish()
}
