#[cfg(not(feature = "persist"))]
fn main() {
    eprintln!(
        "The tickline CLI requires the \"persist\" feature. Rebuild with `--features persist` to inspect timeline files."
    );
}

#[cfg(feature = "persist")]
mod cli {
    use anyhow::{bail, Context, Result};
    use std::env;
    use std::path::Path;
    use tracing_subscriber::EnvFilter;

    use tickline::persist::{compact_file, read_timeline_file, LoadedTimeline};
    use tickline::timeline::{ActionKind, History, NodeId, NodeKind};

    const USAGE: &str = "Usage:\n  tickline info <file>      Summarize a timeline file\n  tickline dump <file>      Print the event tree\n  tickline compact <file>   Rewrite the file as a minimal log\n\nSet RUST_LOG=debug for diagnostics.";

    fn load(path: &Path) -> Result<LoadedTimeline> {
        read_timeline_file(path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn depth(history: &History, mut id: NodeId) -> usize {
        let mut depth = 0;
        while let Some(parent) = history.node(id).and_then(|n| n.parent()) {
            depth += 1;
            id = parent;
        }
        depth
    }

    fn describe(kind: &NodeKind) -> String {
        match kind {
            NodeKind::Root => String::new(),
            NodeKind::Action(action) => match &action.kind {
                ActionKind::KeyPress { key, down } => {
                    format!("key {key} {}", if *down { "down" } else { "up" })
                }
                ActionKind::LoadDisc { drive, media } => format!(
                    "drive {drive} {}",
                    if media.is_some() { "inserted" } else { "ejected" }
                ),
                ActionKind::LoadTape { media } => {
                    (if media.is_some() { "inserted" } else { "ejected" }).to_string()
                }
                ActionKind::RunUntil { stop_ticks, .. } => format!("until {stop_ticks}"),
                ActionKind::CoreVersion { version } => format!("v{version}"),
                _ => String::new(),
            },
            NodeKind::Bookmark(bookmark) => format!("v{}", bookmark.version),
        }
    }

    fn info(path: &Path) -> Result<()> {
        let loaded = load(path)?;
        let history = &loaded.history;
        let bookmarks = history
            .preorder()
            .into_iter()
            .filter(|id| history.node(*id).is_some_and(|n| n.bookmark().is_some()))
            .count();
        let last_tick = history
            .preorder()
            .into_iter()
            .filter_map(|id| history.node(id).map(|n| n.end_ticks()))
            .max()
            .unwrap_or(0);

        println!("File:      {}", path.display());
        println!("Name:      {}", loaded.name.as_deref().unwrap_or("(unnamed)"));
        println!("Events:    {}", history.len().saturating_sub(1));
        println!("Bookmarks: {bookmarks}");
        println!("Blobs:     {}", loaded.next_blob_id);
        println!("Current:   {} @ {} ticks", history.current_id(), history.current().end_ticks());
        println!("Last tick: {last_tick}");
        Ok(())
    }

    fn dump(path: &Path) -> Result<()> {
        let loaded = load(path)?;
        let history = &loaded.history;
        for id in history.preorder() {
            let Some(node) = history.node(id) else {
                continue;
            };
            let marker = if id == history.current_id() { "*" } else { " " };
            println!(
                "{marker}{:indent$}{id} {} @{} {}",
                "",
                node.label(),
                node.ticks(),
                describe(node.kind()),
                indent = depth(history, id) * 2
            );
        }
        Ok(())
    }

    fn compact(path: &Path) -> Result<()> {
        let loaded = load(path)?;
        let before = std::fs::metadata(path)?.len();
        compact_file(path, &loaded.history, loaded.name.as_deref())
            .with_context(|| format!("failed to compact {}", path.display()))?;
        let after = std::fs::metadata(path)?.len();
        println!("Compacted {}: {before} -> {after} bytes", path.display());
        Ok(())
    }

    pub fn run() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_writer(std::io::stderr)
            .init();

        let args: Vec<String> = env::args().skip(1).collect();
        match args.as_slice() {
            [flag] if flag == "-h" || flag == "--help" => {
                println!("{USAGE}");
                Ok(())
            }
            [command, file] => {
                let path = Path::new(file);
                match command.as_str() {
                    "info" => info(path),
                    "dump" => dump(path),
                    "compact" => compact(path),
                    other => bail!("Unknown command: {other}\n\n{USAGE}"),
                }
            }
            _ => bail!("{USAGE}"),
        }
    }
}

#[cfg(feature = "persist")]
fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
