//! `dentcoach knowledge`: knowledge base administration.

use clap::Subcommand;
use dentcoach_core::knowledge::{
    KnowledgeEntry, KnowledgeStore, KnowledgeType, KnowledgeUpdate, NewKnowledgeEntry,
};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum KnowledgeAction {
    /// List entries, newest first
    List {
        /// Include inactive entries
        #[arg(short, long)]
        all: bool,
    },

    /// Show a single entry
    Show { id: String },

    /// Add an entry
    Add {
        #[arg(long)]
        title: String,

        /// Entry type: text, document, youtube, ...
        #[arg(long = "type", default_value = "text")]
        kind: String,

        /// Body text
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,

        /// Read the body from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Source link (required for youtube)
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        added_by: Option<String>,
    },

    /// Delete an entry permanently
    Remove { id: String },

    /// Include an entry in grounding
    Activate { id: String },

    /// Exclude an entry from grounding without deleting it
    Deactivate { id: String },
}

pub async fn run(action: KnowledgeAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;
    execute(store.as_ref(), action).await
}

pub(crate) async fn execute(
    store: &dyn KnowledgeStore,
    action: KnowledgeAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        KnowledgeAction::List { all } => {
            let entries = if all {
                store.list_all().await?
            } else {
                let mut active = store.list_active().await?;
                active.reverse();
                active
            };
            if entries.is_empty() {
                println!("  No knowledge entries.");
            }
            for entry in &entries {
                println!("{}", summary_line(entry));
            }
        }
        KnowledgeAction::Show { id } => {
            let entry = store
                .get(&id)
                .await?
                .ok_or_else(|| format!("No knowledge entry with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        KnowledgeAction::Add {
            title,
            kind,
            content,
            file,
            url,
            added_by,
        } => {
            let content = match (content, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("Cannot read {}: {e}", path.display()))?,
                (None, None) => String::new(),
            };
            let mut new = NewKnowledgeEntry::new(title, content, KnowledgeType::from(kind));
            if let Some(url) = url {
                new = new.with_source_url(url);
            }
            if let Some(actor) = added_by {
                new = new.with_added_by(actor);
            }
            let entry = store.create(new).await?;
            println!("  Added {} ({})", entry.id, entry.title);
        }
        KnowledgeAction::Remove { id } => {
            if !store.delete(&id).await? {
                return Err(format!("No knowledge entry with id {id}").into());
            }
            println!("  Removed {id}");
        }
        KnowledgeAction::Activate { id } => set_active(store, &id, true).await?,
        KnowledgeAction::Deactivate { id } => set_active(store, &id, false).await?,
    }
    Ok(())
}

async fn set_active(
    store: &dyn KnowledgeStore,
    id: &str,
    active: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = store
        .update(id, KnowledgeUpdate::activate(active))
        .await?
        .ok_or_else(|| format!("No knowledge entry with id {id}"))?;
    let state = if entry.is_active { "active" } else { "inactive" };
    println!("  {} is now {state}", entry.title);
    Ok(())
}

fn summary_line(entry: &KnowledgeEntry) -> String {
    format!(
        "  {} [{}]{} {} ({} chars, by {}, {})",
        entry.id,
        entry.kind,
        if entry.is_active { "" } else { " (inactive)" },
        entry.title,
        entry.content.chars().count(),
        entry.added_by,
        entry.created_at.format("%Y-%m-%d"),
    )
}
