//! Markdown archive per conversation.
//!
//! Layout of `<dir>/<sanitized name>.md`:
//!
//! ```text
//! ## <display name>
//!
//! ##### <sender> - <timestamp>
//! <body>
//!
//! ##### <sender> - <timestamp>
//! <body>
//! attachments:
//! ```[...]```
//! ```
//!
//! Each flush puts its entries right below the title, above everything
//! written before. Pages arrive newest first, so every later batch is older
//! than the content already on disk: writing each batch reversed keeps the
//! whole document in chronological order.
use eyre::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::model::Message;

const EXTENSION: &str = "md";

/// Keeps letters, digits and spaces of a display name.
pub fn sanitize_filename(display_name: &str) -> String {
    let name: String = display_name
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_numeric() || *c == ' ')
        .collect();
    let name = name.trim_end();
    if name.trim().is_empty() {
        "untitled".to_string()
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    dir: PathBuf,
}

impl ArchiveWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, display_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_filename(display_name), EXTENSION))
    }

    /// Prepends `messages` to the conversation's archive.
    ///
    /// `messages` are in server order (newest first). With `newest_first` they
    /// are emitted as given, otherwise reversed. Returns the number of entries
    /// written.
    pub fn flush(
        &self,
        display_name: &str,
        messages: &[Message],
        newest_first: bool,
    ) -> Result<usize> {
        let path = self.path_for(display_name);
        let existing = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("Failed to read: {}", path.display()));
            }
        };

        let ordered: Box<dyn Iterator<Item = &Message>> = if newest_first {
            Box::new(messages.iter())
        } else {
            Box::new(messages.iter().rev())
        };
        let entries: Vec<String> = ordered
            .filter(|m| !m.is_noise())
            .map(render_entry)
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let (title, previous) = split_title(&existing);
        let title = match title {
            Some(t) => t.to_string(),
            None => format!("## {}", display_name),
        };
        let mut blocks = Vec::with_capacity(entries.len() + 1);
        blocks.push(title);
        blocks.extend(entries.iter().cloned());

        fs::create_dir_all(&self.dir)
            .wrap_err_with(|| format!("Failed to create archive dir: {}", self.dir.display()))?;
        let mut tmp = NamedTempFile::new_in(&self.dir).wrap_err("Failed to create temporary file")?;
        write!(tmp, "{}\n\n{}", blocks.join("\n\n"), previous)
            .wrap_err_with(|| format!("Failed to write: {}", path.display()))?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .wrap_err_with(|| format!("Failed to replace: {}", path.display()))?;

        Ok(entries.len())
    }
}

/// Splits an existing archive into its title line and the entries below it.
fn split_title(existing: &str) -> (Option<&str>, &str) {
    if !existing.starts_with("## ") {
        return (None, existing);
    }
    match existing.split_once("\n\n") {
        Some((title, rest)) => (Some(title), rest),
        None => (Some(existing.trim_end()), ""),
    }
}

fn render_entry(msg: &Message) -> String {
    let mut entry = format!("##### {} - {}\n{}", msg.sender, msg.timestamp, msg.body);
    if !msg.attachments.is_empty() {
        let rendered =
            serde_json::to_string(&msg.attachments).unwrap_or_else(|_| "[]".to_string());
        entry.push_str(&format!("\nattachments:\n```{}```", rendered));
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn msg(sender: &str, body: &str, ts: &str) -> Message {
        Message {
            sender: sender.into(),
            body: body.into(),
            attachments: vec![],
            timestamp: ts.into(),
        }
    }

    #[test]
    fn sanitizes_display_names() {
        assert_eq!(sanitize_filename("Team: Q&A!"), "Team QA");
        assert_eq!(sanitize_filename("Ada; Grace; et.al.x_y"), "Ada Grace etalxy");
        assert_eq!(sanitize_filename("Café 42 "), "Café 42");
        assert_eq!(sanitize_filename("?!"), "untitled");
    }

    #[test]
    fn first_flush_writes_title() {
        let dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(dir.path().join("chats"));
        let n = writer
            .flush(
                "Team: Q&A!",
                &[msg("Ada", "second", "t2"), msg("Bob", "first", "t1")],
                true,
            )
            .unwrap();
        assert_eq!(n, 2);

        let content = fs::read_to_string(dir.path().join("chats/Team QA.md")).unwrap();
        assert_eq!(
            content,
            "## Team: Q&A!\n\n##### Ada - t2\nsecond\n\n##### Bob - t1\nfirst\n\n"
        );
    }

    #[test]
    fn later_batches_go_above_earlier_ones() {
        let dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(dir.path());
        writer.flush("c", &[msg("a", "b1", "t1")], true).unwrap();
        writer.flush("c", &[msg("a", "b2", "t2")], true).unwrap();

        let content = fs::read_to_string(writer.path_for("c")).unwrap();
        assert_eq!(
            content,
            "## c\n\n##### a - t2\nb2\n\n##### a - t1\nb1\n\n"
        );
        assert_eq!(content.matches("b1").count(), 1);
        assert_eq!(content.matches("b2").count(), 1);
    }

    #[test]
    fn reversed_batches_stay_chronological_across_flushes() {
        let dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(dir.path());
        writer
            .flush("c", &[msg("a", "m4", "t4"), msg("b", "m3", "t3")], false)
            .unwrap();
        writer
            .flush("c", &[msg("a", "m2", "t2"), msg("b", "m1", "t1")], false)
            .unwrap();

        let content = fs::read_to_string(writer.path_for("c")).unwrap();
        assert_eq!(
            content,
            "## c\n\n##### b - t1\nm1\n\n##### a - t2\nm2\n\n\
             ##### b - t3\nm3\n\n##### a - t4\nm4\n\n"
        );
    }

    #[test]
    fn noise_is_skipped_and_attachments_rendered() {
        let dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(dir.path());
        let mut with_file = msg("a", "", "t2");
        with_file.attachments = vec![json!({"name": "spec.pdf"})];
        let n = writer
            .flush("c", &[msg("sys", "  ", "t3"), with_file], true)
            .unwrap();
        assert_eq!(n, 1);
        let content = fs::read_to_string(writer.path_for("c")).unwrap();
        assert!(!content.contains("sys"));
        assert!(content.contains("##### a - t2\n\nattachments:\n```[{\"name\":\"spec.pdf\"}]```"));
    }

    #[test]
    fn all_noise_leaves_archive_untouched() {
        let dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(dir.path());
        assert_eq!(writer.flush("c", &[msg("sys", "", "t")], true).unwrap(), 0);
        assert!(!writer.path_for("c").exists());

        writer.flush("c", &[msg("a", "x", "t1")], true).unwrap();
        let before = fs::read_to_string(writer.path_for("c")).unwrap();
        writer.flush("c", &[], true).unwrap();
        assert_eq!(fs::read_to_string(writer.path_for("c")).unwrap(), before);
    }
}
