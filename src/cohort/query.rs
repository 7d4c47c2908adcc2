//! Implementation of the `cohort query` and `cohort terms` sub commands.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::time::Instant;

use clap::Parser;
use thousands::Separable;

use crate::common::trace_rss_now;

use super::{
    conf::SearchConf, memory::MemoryGraph, run_search, schema::query::RawFilters,
    terms::lookup_terms,
};

/// Command line arguments for `cohort query` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run cohort search on a graph snapshot", long_about = None)]
pub struct Args {
    /// Path to the graph snapshot JSON file.
    #[arg(long, required = true)]
    pub path_graph: String,
    /// Path to the filters JSON file.
    #[arg(long, required = true)]
    pub path_filters: String,
    /// Path to the output JSON file.
    #[arg(long, required = true)]
    pub path_output: String,
    /// Optional path to configuration TOML file.
    #[arg(long)]
    pub path_conf: Option<String>,

    /// Override the maximal number of candidate variants.
    #[arg(long)]
    pub soft_limit: Option<usize>,
    /// Override the maximal number of returned records.
    #[arg(long)]
    pub hard_limit: Option<usize>,
    /// Log the query plan rendered as parameterized Cypher.
    #[arg(long, default_value_t = false)]
    pub explain: bool,
}

/// Main entry point for `cohort query` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let conf = SearchConf::resolve(
        args.path_conf.as_deref(),
        args.soft_limit,
        args.hard_limit,
        None,
    )?;
    tracing::info!("conf = {:?}", &conf);

    tracing::info!("Loading filters...");
    let raw: RawFilters = serde_json::from_reader(BufReader::new(
        File::open(&args.path_filters)
            .map_err(|e| anyhow::anyhow!("could not open {}: {}", &args.path_filters, e))?,
    ))?;
    tracing::info!("... done loading filters = {}", &serde_json::to_string(&raw)?);

    tracing::info!("Loading graph...");
    let before_loading = Instant::now();
    let graph = MemoryGraph::load(&args.path_graph)?;
    tracing::info!(
        "... done loading graph with {} nodes and {} edges in {:?}",
        graph.node_count().separate_with_commas(),
        graph.edge_count().separate_with_commas(),
        before_loading.elapsed()
    );

    trace_rss_now();

    tracing::info!("Running search...");
    let before_query = Instant::now();
    let outcome = run_search(&raw, &conf, &graph, &graph, &graph)?;
    tracing::info!(
        "... done running search in {:?}, {} records",
        before_query.elapsed(),
        outcome.records.len().separate_with_commas()
    );

    if args.explain {
        let cypher = outcome.plan.to_cypher();
        tracing::info!("query = {}", &cypher.text);
        tracing::info!("params = {}", serde_json::to_string(&cypher.params)?);
    }

    let mut writer = BufWriter::new(File::create(&args.path_output)?);
    serde_json::to_writer_pretty(&mut writer, &outcome.records)?;
    writeln!(writer)?;
    writer.flush()?;

    trace_rss_now();

    tracing::info!(
        "All of `cohort query` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

/// Command line arguments for `cohort terms` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Look up HPO terms by id or label", long_about = None)]
pub struct TermsArgs {
    /// Path to the graph snapshot JSON file.
    #[arg(long, required = true)]
    pub path_graph: String,
    /// The id or label fragment to look for.
    #[arg(long, required = true)]
    pub query: String,
    /// Path to the output JSON file.
    #[arg(long, required = true)]
    pub path_output: String,
    /// Optional path to configuration TOML file.
    #[arg(long)]
    pub path_conf: Option<String>,
    /// Override the maximal number of returned terms.
    #[arg(long)]
    pub max_term_results: Option<usize>,
}

/// Main entry point for `cohort terms` sub command.
pub fn run_terms(args_common: &crate::common::Args, args: &TermsArgs) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let conf = SearchConf::resolve(args.path_conf.as_deref(), None, None, args.max_term_results)?;
    let graph = MemoryGraph::load(&args.path_graph)?;
    let hits = lookup_terms(&graph, &args.query, &conf)?;
    tracing::info!("found {} terms", hits.len());

    let mut writer = BufWriter::new(File::create(&args.path_output)?);
    serde_json::to_writer_pretty(&mut writer, &hits)?;
    writeln!(writer)?;
    writer.flush()?;

    Ok(())
}
