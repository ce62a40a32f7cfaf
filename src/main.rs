mod cmd;

use argh::FromArgs;
use cmd::SubCommand;

#[derive(FromArgs, PartialEq, Debug)]
/// Tools for working with Dinosaur Planet / Star Fox Adventures formats.
struct TopLevel {
    #[argh(subcommand)]
    command: SubCommand,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .format_level(false)
        .init();

    let args: TopLevel = argh::from_env();
    let result = match args.command {
        SubCommand::Model(args) => cmd::model::run(args),
    };
    if let Err(e) = result {
        eprintln!("Failed: {e:?}");
        std::process::exit(1);
    }
}
