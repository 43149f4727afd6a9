use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("statewalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("statewalk")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("explore")
                .about(
                    "Explore a web application from an entry URL and infer its pages, requests \
                and states.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The entry URL")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("JSON engine configuration (default: built-in settings)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-m --"max-steps" <NUM>)
                        .required(false)
                        .help("Maximum number of observations before stopping")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-s --"seed" <SEED>)
                        .required(false)
                        .help("Seed for form values and random walks")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-p --"param" <NAME_VALUE>)
                        .required(false)
                        .help("Value to use for form fields called NAME, as NAME=VALUE (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save the report to a file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, dot")
                        .value_parser(["text", "json", "dot"])
                        .default_value("text"),
                ),
        )
}
