use anyhow::Context;
use shellington::config::log_subscriber;
use shellington::{Args, Config, Environment, Interpreter};
use std::io::IsTerminal;

fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(log_subscriber(
        std::io::stderr,
        std::io::stderr().is_terminal(),
    ))
    .context("cannot install the log subscriber")?;

    let args: Args = argh::from_env();

    let env = Environment::new();
    let config = Config::from_args(&args, &env);
    let mut interpreter = Interpreter::new(config, env);

    match &args.command {
        Some(line) => {
            interpreter.run_line(line);
            std::process::exit(interpreter.last_status());
        }
        None => interpreter.repl(),
    }
}
