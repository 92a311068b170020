//! In-memory tree engine.
//!
//! [`MemoryDocument`] holds a mutable node arena, [`MemoryWalker`] implements
//! [`crate::Walker`] over it, and [`MemoryWindow`] / [`MemoryFrame`] expose a
//! document as a browsing context.

mod document;
mod walker;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use document::{MemoryDocument, MemoryNode, XHTML_NAMESPACE};
pub use walker::{LOCKABLE_PSEUDO_CLASSES, MemoryWalker};

use crate::errors::WalkerError;
use crate::inspector::{ContentWindow, FrameElement};
use crate::walker::{Walker, WalkerOptions};

fn default_url() -> String {
    "about:blank".to_owned()
}

/// JSON description of a page.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSpec {
    /// Tab title.
    #[serde(default)]
    pub title: Option<String>,
    /// Tab URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Doctype name (`html`), if any.
    #[serde(default)]
    pub doctype: Option<String>,
    /// Children of the document node.
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

/// One node of a [`DocumentSpec`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    /// `{"tag": "div", "attrs": {...}, "children": [...]}`
    Element {
        /// Tag name.
        tag: String,
        /// Attributes, applied in name order.
        #[serde(default)]
        attrs: BTreeMap<String, String>,
        /// Child nodes.
        #[serde(default)]
        children: Vec<NodeSpec>,
    },
    /// `{"text": "..."}`
    Text {
        /// Character data.
        text: String,
    },
    /// `{"comment": "..."}`
    Comment {
        /// Comment data.
        comment: String,
    },
}

impl Default for DocumentSpec {
    fn default() -> Self {
        Self {
            title: None,
            url: default_url(),
            doctype: None,
            children: Vec::new(),
        }
    }
}

impl DocumentSpec {
    /// Parse a JSON description.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(std::io::Error::other)
    }

    /// Small built-in page.
    pub fn sample() -> Self {
        let element = |tag: &str, attrs: &[(&str, &str)], children: Vec<NodeSpec>| NodeSpec::Element {
            tag: tag.to_owned(),
            attrs: attrs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            children,
        };
        let text = |data: &str| NodeSpec::Text {
            text: data.to_owned(),
        };
        Self {
            title: Some("Lookout sample".to_owned()),
            url: "about:lookout".to_owned(),
            doctype: Some("html".to_owned()),
            children: vec![element(
                "html",
                &[("lang", "en")],
                vec![
                    element("head", &[], vec![element("title", &[], vec![text("Lookout sample")])]),
                    element(
                        "body",
                        &[("class", "page")],
                        vec![
                            element("h1", &[("id", "title")], vec![text("Hello")]),
                            NodeSpec::Comment {
                                comment: " list ".to_owned(),
                            },
                            element(
                                "ul",
                                &[("id", "list")],
                                (1..=5)
                                    .map(|i| {
                                        element("li", &[("class", "item")], vec![text(&format!("Item {i}"))])
                                    })
                                    .collect(),
                            ),
                            element("a", &[("href", "#top"), ("id", "link")], vec![text("Back to top")]),
                        ],
                    ),
                ],
            )],
        }
    }
}

/// A content window hosting one [`MemoryDocument`].
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    document: MemoryDocument,
    title: String,
    url: String,
}

impl MemoryWindow {
    /// Window over an existing document.
    pub fn new(document: MemoryDocument, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            document,
            title: title.into(),
            url: url.into(),
        }
    }

    /// Build the document described by `spec` and host it.
    pub fn from_spec(spec: &DocumentSpec) -> Self {
        Self::new(
            MemoryDocument::from_spec(spec),
            spec.title.clone().unwrap_or_default(),
            spec.url.clone(),
        )
    }

    /// The hosted document.
    pub fn document(&self) -> &MemoryDocument {
        &self.document
    }
}

impl ContentWindow for MemoryWindow {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn open_walker(&self, options: WalkerOptions) -> Result<Arc<dyn Walker>, WalkerError> {
        Ok(Arc::new(MemoryWalker::new(self.document.clone(), options)))
    }
}

/// A frame element, optionally hosting a window.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrame {
    window: Option<Arc<MemoryWindow>>,
}

impl MemoryFrame {
    /// Frame showing `window`.
    pub fn new(window: Arc<MemoryWindow>) -> Self {
        Self {
            window: Some(window),
        }
    }

    /// Frame with nothing loaded.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl FrameElement for MemoryFrame {
    fn content_window(&self) -> Option<Arc<dyn ContentWindow>> {
        self.window
            .clone()
            .map(|window| window as Arc<dyn ContentWindow>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parses_all_node_shapes() {
        let spec = DocumentSpec::from_json(
            r#"{"title": "t", "children": [{"tag": "p", "children": [{"text": "a"}, {"comment": "b"}]}]}"#,
        )
        .unwrap();
        assert_eq!(spec.url, "about:blank");
        assert!(spec.doctype.is_none());
        let doc = MemoryDocument::from_spec(&spec);
        assert_eq!(doc.all_nodes().len(), 4);
    }

    #[test]
    fn sample_page_has_list() {
        let window = MemoryWindow::from_spec(&DocumentSpec::sample());
        let list = window.document().get_element_by_id("list").unwrap();
        assert_eq!(list.num_children(), 5);
        assert_eq!(window.title(), "Lookout sample");
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.json");
        std::fs::write(&path, r#"{"url": "http://x/"}"#).unwrap();
        assert_eq!(DocumentSpec::from_file(&path).unwrap().url, "http://x/");
        std::fs::write(&path, "nope").unwrap();
        assert!(DocumentSpec::from_file(&path).is_err());
        assert!(DocumentSpec::from_file(&dir.path().join("absent.json")).is_err());
    }

    #[tokio::test]
    async fn window_opens_independent_walkers() {
        let window = MemoryWindow::from_spec(&DocumentSpec::sample());
        let a = window.open_walker(WalkerOptions::default()).unwrap();
        let b = window.open_walker(WalkerOptions::default()).unwrap();
        a.destroy();
        assert!(a.root().await.is_err());
        assert!(b.root().await.is_ok());
    }

    #[test]
    fn frame_content_window() {
        let window = Arc::new(MemoryWindow::from_spec(&DocumentSpec::default()));
        assert!(MemoryFrame::new(window).content_window().is_some());
        assert!(MemoryFrame::empty().content_window().is_none());
    }
}
