use colored::Colorize;
use statewalk::commands::command_argument_builder;
use statewalk::handlers::{handle_explore, print_banner};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    match chosen_command.subcommand() {
        Some(("explore", primary_command)) => {
            if let Err(e) = handle_explore(primary_command, quiet).await {
                eprintln!("{} {:#}", "✗".red().bold(), e);
                std::process::exit(1);
            }
        }
        // no subcommand, just the banner
        None => {}
        _ => unreachable!("clap should ensure we don't get here"),
    }
}
