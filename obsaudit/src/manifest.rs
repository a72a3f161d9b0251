//! Inspection and stripping of a package's `_service` descriptor.
//!
//! `cargo_audit` and `cargo_vendor` are triggered by the audit itself, so they
//! are removed from the descriptor before the server-side services are re-run.
//! Everything else in the document is copied through event by event, which
//! keeps the surrounding markup byte-for-byte.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use tracing::{debug, instrument};

pub const SERVICE_FILE: &str = "_service";
pub const AUDIT_STEP: &str = "cargo_audit";
pub const VENDOR_STEP: &str = "cargo_vendor";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestState {
    pub has_service_file: bool,
    pub has_audit_step: bool,
    pub has_vendor_step: bool,
    pub has_vendor_auto_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockfile: Option<String>,
}

enum Step {
    Audit,
    Vendor,
}

impl Step {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            AUDIT_STEP => Some(Step::Audit),
            VENDOR_STEP => Some(Step::Vendor),
            _ => None,
        }
    }

    fn record(&self, params: &[(String, String)], state: &mut ManifestState) {
        match self {
            Step::Audit => {
                state.has_audit_step = true;
                if let Some((_, path)) = params.iter().find(|(name, _)| name == "lockfile") {
                    state.lockfile = (!path.is_empty()).then(|| path.clone());
                }
            }
            Step::Vendor => {
                state.has_vendor_step = true;
                if params
                    .iter()
                    .any(|(name, value)| name == "update" && value == "true")
                {
                    state.has_vendor_auto_update = true;
                }
            }
        }
    }
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    match element.try_get_attribute(key)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Unquoted values and repeated names only surface when the attributes are
/// iterated.
fn check_attributes(element: &BytesStart<'_>) -> Result<()> {
    for attr in element.attributes() {
        attr?;
    }
    Ok(())
}

fn service_name(element: &BytesStart<'_>) -> Result<String> {
    attribute(element, "name")?.context("<service> element without a name attribute")
}

/// Consume the body of a `<service>` element up to and including its end tag,
/// returning its direct `<param name="...">text</param>` children.
fn read_params(reader: &mut Reader<&[u8]>) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut depth = 1usize;
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                check_attributes(&e)?;
                depth += 1;
                if depth == 2 && e.name().as_ref() == b"param" {
                    current = attribute(&e, "name")?.map(|name| (name, String::new()));
                }
            }
            Event::Empty(e) => {
                check_attributes(&e)?;
                if depth == 1 && e.name().as_ref() == b"param" {
                    if let Some(name) = attribute(&e, "name")? {
                        params.push((name, String::new()));
                    }
                }
            }
            Event::Text(t) => {
                if let (2, Some((_, value))) = (depth, current.as_mut()) {
                    value.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let (2, Some((_, value))) = (depth, current.as_mut()) {
                    value.push_str(std::str::from_utf8(&c)?);
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    params.extend(current.take());
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(params);
                }
            }
            Event::Eof => bail!("document ends inside a <service> element"),
            _ => {}
        }
    }
}

fn is_whitespace(event: &Event<'_>) -> bool {
    matches!(event, Event::Text(t) if t.iter().all(u8::is_ascii_whitespace))
}

/// Scan a descriptor and strip the audit and vendor steps from it.
///
/// Returns the recorded state and, when anything was removed, the rewritten
/// document. The whitespace directly before a removed step goes with it.
pub fn strip_automation(xml: &str) -> Result<(ManifestState, Option<String>)> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut state = ManifestState {
        has_service_file: true,
        ..ManifestState::default()
    };
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut removed = false;
    let mut pending: Option<Event<'_>> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("XML error at byte {}", reader.error_position()))?;

        match &event {
            Event::Start(e) | Event::Empty(e) => check_attributes(e)
                .with_context(|| format!("bad attribute near byte {}", reader.buffer_position()))?,
            Event::Text(_) | Event::CData(_) if depth == 0 && !is_whitespace(&event) => {
                bail!("text outside the root element");
            }
            _ => {}
        }

        let target = match &event {
            Event::Start(e) | Event::Empty(e) if depth == 1 && e.name().as_ref() == b"service" => {
                Step::from_name(&service_name(e)?)
            }
            _ => None,
        };

        if let Some(step) = target {
            let params = match event {
                Event::Start(_) => read_params(&mut reader)?,
                _ => vec![],
            };
            step.record(&params, &mut state);
            pending = None;
            removed = true;
            continue;
        }

        if depth == 1 && is_whitespace(&event) {
            if let Some(previous) = pending.replace(event) {
                writer.write_event(previous)?;
            }
            continue;
        }

        if let Some(previous) = pending.take() {
            writer.write_event(previous)?;
        }

        match &event {
            Event::Eof => break,
            Event::Start(_) | Event::Empty(_) if depth == 0 => {
                if seen_root {
                    bail!("more than one root element");
                }
                seen_root = true;
            }
            _ => {}
        }

        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth = depth.checked_sub(1).context("unexpected closing tag")?;
            }
            _ => {}
        }

        writer.write_event(event)?;
    }

    if depth != 0 {
        bail!("document ends with {depth} unclosed element(s)");
    }
    if !seen_root {
        bail!("document has no root element");
    }

    let rewritten = if removed {
        Some(String::from_utf8(writer.into_inner()).context("rewritten descriptor is not UTF-8")?)
    } else {
        None
    };
    Ok((state, rewritten))
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(SERVICE_FILE);
    let tmp_path = dir.join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Report the automation declared in `package_dir/_service` and strip the
/// audit and vendor steps from it.
///
/// A missing descriptor yields an all-false state. A malformed one is an
/// error and the file is left as it was.
#[instrument]
pub fn inspect_manifest(package_dir: &Path) -> Result<ManifestState> {
    let path = package_dir.join(SERVICE_FILE);
    if !path.exists() {
        debug!("no service file");
        return Ok(ManifestState::default());
    }

    let xml = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let (state, rewritten) = strip_automation(&xml)
        .with_context(|| format!("malformed service file {}", path.display()))?;

    if let Some(content) = rewritten {
        write_atomically(&path, &content)?;
        debug!(path = %path.display(), "stripped audit and vendor steps");
    }

    Ok(state)
}
