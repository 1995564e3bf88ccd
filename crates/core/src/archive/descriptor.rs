use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{info, instrument, warn};

use super::DESCRIPTOR_FILE;
use crate::errors::ArchiveError;

/// Default version label embedded in merged archive names.
pub const DEFAULT_VERSION: &str = "4.1.05";

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Names derived for one merge: `{SOURCE}_{TARGET}_Merged_V{version}_{DATE}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeNaming {
    source_tag: String,
    target_tag: String,
    version: String,
    date_tag: String,
}

impl MergeNaming {
    pub fn new(source_host: &str, target_host: &str, version: &str, date: NaiveDate) -> Self {
        Self {
            source_tag: Self::host_tag(source_host),
            target_tag: Self::host_tag(target_host),
            version: version.to_string(),
            date_tag: Self::date_tag(date),
        }
    }

    /// First DNS label, upper-cased.
    pub fn host_tag(host: &str) -> String {
        host.split('.').next().unwrap_or(host).to_uppercase()
    }

    /// `13FEB2025` style date.
    pub fn date_tag(date: NaiveDate) -> String {
        date.format("%d%b%Y").to_string().to_uppercase()
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    pub fn target_tag(&self) -> &str {
        &self.target_tag
    }

    pub fn date(&self) -> &str {
        &self.date_tag
    }

    /// Archive and descriptor name, without the `.zip` extension.
    pub fn archive_name(&self) -> String {
        format!(
            "{}_{}_Merged_V{}_{}",
            self.source_tag, self.target_tag, self.version, self.date_tag
        )
    }

    pub fn description(&self) -> String {
        format!(
            "Config from {} brought to {} on {}",
            self.source_tag, self.target_tag, self.date_tag
        )
    }
}

// ---------------------------------------------------------------------------
// Descriptor document
// ---------------------------------------------------------------------------

/// Where a direct child of the root element sits in the event list.
enum ChildSpan {
    /// `<name/>`
    Empty(usize, BytesStart<'static>),
    /// `<name>` .. `</name>` (start index, end index)
    Pair(usize, usize),
}

/// Where the root element closes.
enum RootClose {
    End(usize),
    Empty(usize, BytesStart<'static>),
}

/// A parsed `descriptor.xml` that keeps every event it did not touch, so
/// unknown elements, attributes and comments survive a rewrite.
#[derive(Debug, Clone)]
pub struct DescriptorDocument {
    events: Vec<Event<'static>>,
}

impl DescriptorDocument {
    pub fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));

        let mut events = Vec::new();
        let mut depth = 0usize;
        let mut roots = 0usize;
        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    return Err(format!(
                        "malformed XML near byte {}: {}",
                        reader.buffer_position(),
                        e
                    ))
                }
            };
            match &event {
                Event::Eof => break,
                Event::Start(_) => {
                    if depth == 0 {
                        roots += 1;
                    }
                    depth += 1;
                }
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Empty(_) if depth == 0 => roots += 1,
                // Layout between elements; the writer re-indents.
                Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => continue,
                _ => {}
            }
            events.push(event.into_owned());
        }

        if depth != 0 {
            return Err("unclosed element at end of document".to_string());
        }
        if roots != 1 {
            return Err(format!("expected one root element, found {}", roots));
        }
        Ok(Self { events })
    }

    /// Own text of a direct child of the root element. Text inside nested
    /// elements is not included.
    pub fn field(&self, name: &str) -> Option<String> {
        match self.child_span(name.as_bytes())? {
            ChildSpan::Empty(..) => Some(String::new()),
            ChildSpan::Pair(start, end) => {
                let mut text = String::new();
                let mut depth = 0usize;
                for event in &self.events[start + 1..end] {
                    match event {
                        Event::Start(_) => depth += 1,
                        Event::End(_) => depth = depth.saturating_sub(1),
                        Event::Text(t) if depth == 0 => text.push_str(&t.unescape().ok()?),
                        Event::CData(c) if depth == 0 => {
                            text.push_str(&String::from_utf8_lossy(c))
                        }
                        _ => {}
                    }
                }
                Some(text)
            }
        }
    }

    /// Replace the text of a direct child of the root element, appending the
    /// child to the root when it does not exist.
    pub fn set_field(&mut self, name: &str, value: &str) {
        let text = Event::Text(BytesText::new(value).into_owned());
        match self.child_span(name.as_bytes()) {
            Some(ChildSpan::Pair(start, end)) => {
                self.events.splice(start + 1..end, [text]);
            }
            Some(ChildSpan::Empty(idx, tag)) => {
                self.events.splice(
                    idx..=idx,
                    [
                        Event::Start(tag),
                        text,
                        Event::End(BytesEnd::new(name.to_string())),
                    ],
                );
            }
            None => {
                let element = [
                    Event::Start(BytesStart::new(name.to_string())),
                    text,
                    Event::End(BytesEnd::new(name.to_string())),
                ];
                match self.root_close() {
                    Some(RootClose::End(idx)) => {
                        self.events.splice(idx..idx, element);
                    }
                    Some(RootClose::Empty(idx, root)) => {
                        let root_name = String::from_utf8_lossy(root.name().as_ref()).into_owned();
                        let mut expanded = vec![Event::Start(root)];
                        expanded.extend(element);
                        expanded.push(Event::End(BytesEnd::new(root_name)));
                        self.events.splice(idx..=idx, expanded);
                    }
                    None => {}
                }
            }
        }
    }

    /// Serialize with 4-space indentation and an XML declaration.
    pub fn to_xml(&self) -> Result<String, String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        if !matches!(self.events.first(), Some(Event::Decl(_))) {
            writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
                .map_err(|e| e.to_string())?;
        }
        for event in &self.events {
            writer
                .write_event(event.clone())
                .map_err(|e| e.to_string())?;
        }
        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| e.to_string())
    }

    fn child_span(&self, name: &[u8]) -> Option<ChildSpan> {
        let mut depth = 0usize;
        let mut open = None;
        for (idx, event) in self.events.iter().enumerate() {
            match event {
                Event::Start(tag) => {
                    if depth == 1 && open.is_none() && tag.name().as_ref() == name {
                        open = Some(idx);
                    }
                    depth += 1;
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == 1 {
                        if let Some(start) = open {
                            return Some(ChildSpan::Pair(start, idx));
                        }
                    }
                }
                Event::Empty(tag) if depth == 1 && open.is_none() && tag.name().as_ref() == name => {
                    return Some(ChildSpan::Empty(idx, tag.clone()));
                }
                _ => {}
            }
        }
        None
    }

    fn root_close(&self) -> Option<RootClose> {
        let mut depth = 0usize;
        for (idx, event) in self.events.iter().enumerate() {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(RootClose::End(idx));
                    }
                }
                Event::Empty(tag) if depth == 0 => {
                    return Some(RootClose::Empty(idx, tag.clone()));
                }
                _ => {}
            }
        }
        None
    }
}

/// Stamp the merged bundle's `descriptor.xml` with the derived name and
/// description. Returns `Ok(false)` when the bundle has no descriptor.
#[instrument(skip_all, fields(output = %output_dir.display()))]
pub fn rewrite_descriptor(output_dir: &Path, naming: &MergeNaming) -> Result<bool, ArchiveError> {
    let path = output_dir.join(DESCRIPTOR_FILE);
    if !path.is_file() {
        warn!("{} not found in merged bundle, leaving metadata as is", DESCRIPTOR_FILE);
        return Ok(false);
    }

    let descriptor_error = |detail: String| ArchiveError::Descriptor {
        path: path.clone(),
        detail,
    };

    let xml = fs::read_to_string(&path)?;
    let mut doc = DescriptorDocument::parse(&xml).map_err(descriptor_error)?;
    let name = naming.archive_name();
    let description = naming.description();
    doc.set_field("name", &name);
    doc.set_field("description", &description);
    let rendered = doc.to_xml().map_err(descriptor_error)?;
    fs::write(&path, rendered)?;

    info!(name = %name, description = %description, "descriptor updated");
    Ok(true)
}
