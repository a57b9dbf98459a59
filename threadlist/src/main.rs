//! threadlist - inspect and maintain the conversation lists
//!
//! Pages through a partition the same way a list view does, and exposes the
//! maintenance operations (lifecycle events, archive, pin) that move
//! conversations between lists.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use threadlist_core::{
    Config, Conversation, ConversationLists, Database, GroupRecord, LifecycleEvent, PagedSource,
    Partition, ThreadId,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "threadlist")]
#[command(about = "Inspect and maintain conversation lists")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the list size and unread count of every partition
    Count,

    /// Print one page of a partition's list
    List {
        /// Partition: open, invited, left, guardian or archived
        #[arg(default_value = "open")]
        partition: Partition,

        /// First item to print
        #[arg(short, long, default_value_t = 0)]
        offset: usize,

        /// Items to print (defaults to the configured page size)
        #[arg(short, long)]
        length: Option<usize>,

        /// Output format: text (default) or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Only threads whose recipient address or name contains this text
        #[arg(long)]
        filter: Option<String>,
    },

    /// List known groups with their lifecycle state
    Groups,

    /// Apply a server-confirmed lifecycle event to a group
    ApplyEvent {
        /// Group fid or cname
        group: String,

        /// Event name, e.g. invitation_accepted
        event: LifecycleEvent,
    },

    /// Archive threads (or unarchive with --undo)
    Archive {
        #[arg(required = true)]
        threads: Vec<i64>,

        #[arg(long)]
        undo: bool,
    },

    /// Pin threads in the given order (or unpin with --undo)
    Pin {
        #[arg(required = true)]
        threads: Vec<i64>,

        #[arg(long)]
        undo: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        threadlist_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = Config::database_path();
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    let lists = ConversationLists::new(db.clone(), db.clone(), &config.pager);

    match args.command {
        Command::Count => count(&db, &lists),
        Command::List {
            partition,
            offset,
            length,
            format,
            filter,
        } => list(&lists, partition, offset, length, &format, filter.as_deref()),
        Command::Groups => groups(&db),
        Command::ApplyEvent { group, event } => apply_event(&db, &group, event),
        Command::Archive { threads, undo } => {
            let ids = to_thread_ids(&threads);
            db.set_archived(&ids, !undo)
                .context("failed to update archived flag")?;
            println!(
                "{} {} thread(s)",
                if undo { "Unarchived" } else { "Archived" },
                ids.len()
            );
            Ok(())
        }
        Command::Pin { threads, undo } => {
            let ids = to_thread_ids(&threads);
            if undo {
                db.unpin_threads(&ids).context("failed to unpin threads")?;
            } else {
                db.pin_threads(&ids).context("failed to pin threads")?;
            }
            let pinned = db.pinned_thread_ids()?;
            println!(
                "Pinned: {}",
                pinned
                    .iter()
                    .map(ThreadId::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(())
        }
    }
}

fn to_thread_ids(ids: &[i64]) -> Vec<ThreadId> {
    ids.iter().copied().map(ThreadId).collect()
}

fn count(db: &Database, lists: &ConversationLists) -> Result<()> {
    println!("{:<10} {:>8} {:>8}", "PARTITION", "ITEMS", "UNREAD");
    for partition in Partition::ALL {
        let items = lists.pager(partition).count()?;
        let unread = db.count_unread(&partition.query())?;
        println!("{:<10} {:>8} {:>8}", partition, items, unread);
    }
    Ok(())
}

fn list(
    lists: &ConversationLists,
    partition: Partition,
    offset: usize,
    length: Option<usize>,
    format: &str,
    filter: Option<&str>,
) -> Result<()> {
    let pager = match filter {
        Some(term) => lists.filtered_pager(partition, term),
        None => lists.pager(partition),
    };
    let length = length.unwrap_or_else(|| lists.page_size());
    if length == 0 {
        anyhow::bail!("--length must be greater than 0");
    }

    let page = pager
        .fetch(offset, length, &CancellationToken::new())
        .with_context(|| format!("failed to fetch {} list", partition))?;
    tracing::info!(%partition, ?filter, offset, length, returned = page.len(), "Listed page");

    if format == "json" {
        let items: Vec<_> = page.iter().map(|item| to_json(lists, item)).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if page.is_empty() {
        println!("No conversations in {} at offset {}.", partition, offset);
        return Ok(());
    }

    for (index, item) in page.iter().enumerate() {
        let position = offset + index;
        match item {
            Conversation::PinnedHeader => println!("{:>4}  -- Pinned --", position),
            Conversation::UnpinnedHeader => println!("{:>4}  -- Chats --", position),
            Conversation::ArchivedFooter { archived_count } => {
                println!("{:>4}  -- Archived ({}) --", position, archived_count)
            }
            Conversation::Thread { row, pinned } => {
                let summary = &row.summary;
                let name = lists
                    .cache()
                    .get(summary.recipient_id)
                    .map(|r| r.label())
                    .unwrap_or_else(|| format!("#{}", summary.recipient_id));
                println!(
                    "{:>4}  [{}] {}{} {} {}",
                    position,
                    summary.thread_id,
                    if *pinned { "* " } else { "" },
                    name,
                    summary.last_message_at.format("%Y-%m-%d %H:%M"),
                    summary.snippet.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn to_json(lists: &ConversationLists, item: &Conversation) -> serde_json::Value {
    match item {
        Conversation::PinnedHeader => serde_json::json!({"type": "pinned_header"}),
        Conversation::UnpinnedHeader => serde_json::json!({"type": "unpinned_header"}),
        Conversation::ArchivedFooter { archived_count } => {
            serde_json::json!({"type": "archived_footer", "archived_count": archived_count})
        }
        Conversation::Thread { row, pinned } => {
            let summary = &row.summary;
            serde_json::json!({
                "type": "thread",
                "key": summary.thread_id,
                "pinned": pinned,
                "recipient": lists.cache().get(summary.recipient_id).map(|r| r.label()),
                "snippet": summary.snippet,
                "last_message_at": summary.last_message_at,
                "unread_count": summary.unread_count,
                "group_fid": summary.group_fid,
                "group_mode": row.group.as_ref().map(|g| g.mode),
            })
        }
    }
}

fn groups(db: &Database) -> Result<()> {
    let groups = db.list_groups()?;
    if groups.is_empty() {
        println!("No groups found.");
        return Ok(());
    }

    println!("{:>8}  {:<20} {:<26} {}", "FID", "CNAME", "MODE", "LIST");
    for group in groups {
        let list = Partition::classify(false, Some((group.mode, group.group_type)))
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8}  {:<20} {:<26} {}",
            group.fid, group.cname, group.mode, list
        );
    }
    Ok(())
}

fn find_group(db: &Database, key: &str) -> Result<GroupRecord> {
    let found = match key.parse::<i64>() {
        Ok(fid) => db.get_group_by_fid(fid)?,
        Err(_) => None,
    };
    match found {
        Some(group) => Ok(group),
        None => db
            .get_group_by_cname(key)?
            .with_context(|| format!("no group with fid or cname '{}'", key)),
    }
}

fn apply_event(db: &Database, key: &str, event: LifecycleEvent) -> Result<()> {
    let group = find_group(db, key)?;
    let mode = db
        .apply_lifecycle_event(group.fid, event)
        .with_context(|| format!("failed to apply {} to group {}", event.as_str(), group.fid))?;

    println!("{} ({}): {} -> {}", group.cname, group.fid, group.mode, mode);
    Ok(())
}
