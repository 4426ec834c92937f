//! This module contains the main entrypoint to the fedboost cli.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use fedboost_tree::{read_model_meta, BoostingOptions, Config, FileModelStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
	name = "fedboost",
	about = "Inspect the configuration and models of a hetero secure boosting host.",
	disable_help_subcommand = true
)]
enum Options {
	#[clap(name = "check-config")]
	CheckConfig(CheckConfigOptions),
	#[clap(name = "inspect")]
	Inspect(InspectOptions),
}

#[derive(Parser, Debug)]
#[clap(about = "validate a config file")]
#[clap(long_about = "load and validate a config file and print the effective options")]
struct CheckConfigOptions {
	#[clap(short, long, help = "the path to a .yaml or .json config file")]
	config: PathBuf,
}

#[derive(Parser, Debug)]
#[clap(about = "inspect a saved model")]
#[clap(long_about = "load a saved host model and print a summary of it")]
struct InspectOptions {
	#[clap(short, long, help = "the directory the model store keeps its files in")]
	store: PathBuf,
	#[clap(short, long, help = "the namespace the model was saved under")]
	namespace: String,
}

#[derive(serde::Serialize)]
struct ModelSummary {
	task_type: fedboost_tree::TaskType,
	loss_type: fedboost_tree::LossType,
	tree_dim: usize,
	n_rounds: usize,
	n_trees: usize,
	artifact_sizes: Vec<Vec<usize>>,
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
	let options = Options::parse();
	let result = match options {
		Options::CheckConfig(options) => cli_check_config(options),
		Options::Inspect(options) => cli_inspect(options),
	};
	if let Err(error) = result {
		eprintln!("{}: {:#}", "error".red().bold(), error);
		std::process::exit(1);
	}
}

fn cli_check_config(options: CheckConfigOptions) -> Result<()> {
	let config = Config::from_path(&options.config)
		.with_context(|| format!("failed to load config {}", options.config.display()))?;
	let boosting_options = BoostingOptions::from_config(config)?;
	tracing::info!(path = %options.config.display(), "config is valid");
	println!("{}", serde_json::to_string_pretty(&boosting_options)?);
	Ok(())
}

fn cli_inspect(options: InspectOptions) -> Result<()> {
	let namespace = options.namespace;
	let store = FileModelStore::new(options.store);
	let model_meta = read_model_meta(&store, &namespace).with_context(|| {
		format!(
			"failed to read model {} from {}",
			namespace,
			store.root().display()
		)
	})?;
	let summary = ModelSummary {
		task_type: model_meta.task_type,
		loss_type: model_meta.loss_type,
		tree_dim: model_meta.tree_dim,
		n_rounds: model_meta.trees.len(),
		n_trees: model_meta.trees.n_trees(),
		artifact_sizes: model_meta
			.trees
			.rounds()
			.iter()
			.map(|trees| trees.iter().map(|tree| tree.len()).collect())
			.collect(),
	};
	println!("{}", serde_json::to_string_pretty(&summary)?);
	Ok(())
}
