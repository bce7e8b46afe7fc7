use clap::Parser;
use cli_support::init_logging;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    init_logging(args.runtime.log_format);
    run_train(args)
}
