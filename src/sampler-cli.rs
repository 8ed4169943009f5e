//! A simple CLI tool for previewing which questions the server will ask for given matches.
//! This uses the internal server selection implementation, and is by definition
//! identical to what the session endpoints serve for the same catalogue.

use std::collections::HashSet;
use std::path::Path;

use clap::{Arg, ArgAction, ArgMatches, Command};

use icebreaker_backend::{
    catalogue::{select, Catalogue, SelectedCategory},
    error::Error as BackendError,
    model::{
        common::role::Role,
        db::{category::Category, question::Question},
    },
};

const PROGRAM_NAME: &str = "sampler-cli";

const ABOUT_TEXT: &str = "Preview the questions selected for icebreaker matches.

EXIT CODES:
     0: Success.
     1: Error.";

const CATALOGUE_PATH: &str = "CATALOGUE_PATH";
const CATALOGUE_PATH_HELP: &str = "The path to a question catalogue in JSON form,\n\
as loaded by the server from `catalogue_path`";

const ROLE: &str = "ROLE";
const ROLE_HELP: &str = "Whose questions to select: `teacher` or `student`";

const MATCH_IDS: &str = "MATCH_IDS";
const MATCH_IDS_HELP: &str = "One or more match IDs to select questions for";

const DIVERSITY: &str = "diversity";
const DIVERSITY_HELP: &str = "Instead of listing questions, report how much the selections\n\
of the given matches overlap";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(CATALOGUE_PATH)
                .help(CATALOGUE_PATH_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(ROLE)
                .help(ROLE_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(MATCH_IDS)
                .help(MATCH_IDS_HELP)
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new(DIVERSITY)
                .long(DIVERSITY)
                .help(DIVERSITY_HELP)
                .action(ArgAction::SetTrue),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// The catalogue or the arguments are malformed.
    Format(String),
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Io(err) => Self::IO(err.to_string()),
            other => Self::Format(other.to_string()),
        }
    }
}

/// How much the selections for a set of matches overlap within one category.
#[derive(Debug, PartialEq)]
struct Diversity {
    category: String,
    /// Mean number of questions shared by two matches.
    mean_overlap: f64,
    /// Share of match pairs that received exactly the same questions.
    identical_share: f64,
}

fn load(path: &str) -> Result<(Vec<Category>, Vec<Question>), Error> {
    Ok(Catalogue::from_file(Path::new(path))?.into_records())
}

/// Select each match's questions.
fn selections(
    path: &str,
    role: Role,
    match_ids: &[String],
) -> Result<Vec<(String, Vec<SelectedCategory>)>, Error> {
    let (categories, questions) = load(path)?;
    Ok(match_ids
        .iter()
        .map(|id| (id.clone(), select(&categories, &questions, id, role)))
        .collect())
}

/// Measure overlap between every pair of the given matches, per category.
fn diversity(path: &str, role: Role, match_ids: &[String]) -> Result<Vec<Diversity>, Error> {
    if match_ids.len() < 2 {
        return Err(Error::Format(
            "Diversity needs at least two match IDs".to_string(),
        ));
    }
    let selections = selections(path, role, match_ids)?;
    let Some((_, first)) = selections.first() else {
        return Ok(Vec::new());
    };

    let mut results = Vec::with_capacity(first.len());
    for (i, selected) in first.iter().enumerate() {
        let sets: Vec<HashSet<u32>> = selections
            .iter()
            .map(|(_, s)| s[i].questions.iter().map(|q| q.id).collect())
            .collect();
        let mut pairs = 0_u32;
        let mut overlap = 0_usize;
        let mut identical = 0_u32;
        for a in 0..sets.len() {
            for b in a + 1..sets.len() {
                pairs += 1;
                overlap += sets[a].intersection(&sets[b]).count();
                if sets[a] == sets[b] {
                    identical += 1;
                }
            }
        }
        results.push(Diversity {
            category: selected.category.name.clone(),
            mean_overlap: overlap as f64 / f64::from(pairs),
            identical_share: f64::from(identical) / f64::from(pairs),
        });
    }
    Ok(results)
}

fn report(args: &ArgMatches) -> Result<(), Error> {
    // Required arguments are guaranteed to be present.
    let path: &String = args.get_one(CATALOGUE_PATH).unwrap();
    let role: &String = args.get_one(ROLE).unwrap();
    let role: Role = role.parse().map_err(|e| Error::Format(format!("{e}")))?;
    let match_ids: Vec<String> = args.get_many(MATCH_IDS).unwrap().cloned().collect();

    if args.get_flag(DIVERSITY) {
        println!("Diversity of {role} selections over {} matches:", match_ids.len());
        for result in diversity(path, role, &match_ids)? {
            println!(
                "  {}: mean overlap {:.2}, identical {:.1}%",
                result.category,
                result.mean_overlap,
                result.identical_share * 100.0
            );
        }
    } else {
        for (match_id, selection) in selections(path, role, &match_ids)? {
            println!("Match {match_id} ({role}):");
            for selected in selection {
                println!("  [{}] {}", selected.category.id, selected.category.name);
                for question in selected.questions {
                    println!("    {:>5}  {}", question.id, question.text);
                }
            }
        }
    }
    Ok(())
}

/// Run the tool, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    match report(args) {
        Ok(()) => 0,
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid input: {}", msg);
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
