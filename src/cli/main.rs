use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use project_text_index::config::Config;
use project_text_index::search::{
    analyze, register_analyzer, stored_u64, CoreFields, IndexStats, QueryTranslator,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tantivy::collector::{Count, TopDocs};
use tantivy::{Index, IndexReader, ReloadPolicy, Searcher, TantivyDocument};

#[derive(Parser)]
#[command(name = "text-index-cli")]
#[command(about = "Inspect and query local entity text indexes", long_about = None)]
struct Cli {
    /// Site directory; overrides the configured one
    #[arg(short = 'd', long, env = "TEXT_INDEX_SITE_DIR")]
    site_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the indexes present under the site directory
    List,

    /// Show statistics of one index
    Inspect {
        #[arg(value_name = "INDEX")]
        index: String,
    },

    /// Count local matches of a query
    Count {
        #[arg(value_name = "INDEX")]
        index: String,

        #[arg(value_name = "QUERY")]
        query: String,
    },

    /// Run a query against one local index
    Search {
        #[arg(value_name = "INDEX")]
        index: String,

        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(short, long, default_value = "0")]
        offset: usize,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the tokens the entity text analyzer produces
    Analyze {
        #[arg(value_name = "TEXT")]
        text: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });
    if let Some(site_dir) = cli.site_dir {
        config.site_dir = site_dir;
    }
    project_text_index::init_tracing(&config.observability);

    let index_root = config.index_root();

    match cli.command {
        Commands::List => {
            let mut names = Vec::new();
            if index_root.is_dir() {
                for entry in std::fs::read_dir(&index_root)
                    .with_context(|| format!("Failed to read {}", index_root.display()))?
                {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
            }
            names.sort();
            println!("{}", serde_json::to_string_pretty(&names)?);
        }

        Commands::Inspect { index } => {
            let dir = index_root.join(&index);
            let (_, searcher) = open_searcher(&dir)?;
            let stats = IndexStats::collect(&index, &dir, &searcher, None)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Count { index, query } => {
            let (opened, searcher) = open_searcher(&index_root.join(&index))?;
            let translator = QueryTranslator::new(&opened.schema(), &[])?;
            let count = searcher.search(&*translator.translate(&query)?, &Count)?;
            let report = json!({ "index": index, "query": query, "count": count });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Search {
            index,
            query,
            offset,
            limit,
        } => {
            let (opened, searcher) = open_searcher(&index_root.join(&index))?;
            let schema = opened.schema();
            let core = CoreFields::resolve(&schema)?;
            let translated = QueryTranslator::new(&schema, &[])?.translate(&query)?;

            let available = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
            let mut hits = Vec::new();
            if limit > 0 && offset < available {
                let collector =
                    TopDocs::with_limit(limit.min(available - offset)).and_offset(offset);
                let top_docs = searcher.search(&*translated, &collector)?;
                for (score, address) in top_docs {
                    let doc: TantivyDocument = searcher.doc(address)?;
                    hits.push(json!({
                        "entity_id": stored_u64(&doc, core.entity_id),
                        "project_id": stored_u64(&doc, core.project_id),
                        "score": score,
                    }));
                }
            }
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }

        Commands::Analyze { text } => {
            println!("{}", serde_json::to_string_pretty(&analyze(&text))?);
        }
    }

    Ok(())
}

fn open_searcher(dir: &Path) -> anyhow::Result<(Index, Searcher)> {
    if !dir.join("meta.json").exists() {
        bail!("No index found at {}", dir.display());
    }

    let index = Index::open_in_dir(dir)
        .with_context(|| format!("Failed to open index at {}", dir.display()))?;
    register_analyzer(&index);

    let reader: IndexReader = index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()?;
    let searcher = reader.searcher();
    Ok((index, searcher))
}
