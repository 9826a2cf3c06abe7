//! Captioned meme images for notification emails.
//!
//! The image is attached inline and referenced by `cid:`. Captions are set
//! above and below it in HTML (`templates/meme.html`) in the configured CSS
//! font family, so the image bytes are sent untouched.

use askama::Template;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::MemeKind;
use crate::config::MemeConfig;

/// Content-ID of the inline image part.
pub const MEME_CID: &str = "meme_image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub top: String,
    pub bottom: String,
}

pub fn caption(kind: MemeKind, node: &str) -> Caption {
    match kind {
        MemeKind::Failure => Caption {
            top: "ONE DOES NOT SIMPLY".into(),
            bottom: format!("RESTART XERO SERVICES ON {node}"),
        },
        MemeKind::Success => Caption {
            top: "XERO SERVICES".into(),
            bottom: format!("RESTORED ON {node}"),
        },
    }
}

/// Raw image ready to attach.
#[derive(Debug, Clone)]
pub struct MemeImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct MemeAssets {
    success: PathBuf,
    failure: PathBuf,
    font_family: String,
}

impl MemeAssets {
    /// `None` when memes are switched off.
    pub fn from_config(config: &MemeConfig) -> Option<Self> {
        if !config.use_memes {
            return None;
        }
        let font_family = match config.font_family.trim() {
            "" => "Impact".to_string(),
            family => family.to_string(),
        };
        Some(Self {
            success: config.successful_restart_meme.clone(),
            failure: config.unsuccessful_restart_meme.clone(),
            font_family,
        })
    }

    pub fn font_family(&self) -> &str {
        &self.font_family
    }

    /// Read the image for `kind`. A missing or unreadable file yields `None`
    /// and the caller falls back to a plain email.
    pub async fn load(&self, kind: MemeKind) -> Option<MemeImage> {
        let path = match kind {
            MemeKind::Success => &self.success,
            MemeKind::Failure => &self.failure,
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(MemeImage {
                bytes,
                content_type: content_type_for(path),
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "meme image unavailable, sending plain email");
                None
            }
        }
    }

    /// HTML body: the plain text, then the image with captions above and below.
    pub fn render_html(&self, body: &str, caption: &Caption) -> Result<String, askama::Error> {
        MemeHtml {
            body,
            top: &caption.top,
            bottom: &caption.bottom,
            cid: MEME_CID,
            caption_style: format!(
                "font-family:'{}',Impact,sans-serif;font-size:20px;color:#fff;\
                 text-shadow:2px 2px 0 #000;text-align:center;margin:0",
                self.font_family
            ),
        }
        .render()
    }
}

#[derive(Template)]
#[template(path = "meme.html")]
struct MemeHtml<'a> {
    body: &'a str,
    top: &'a str,
    bottom: &'a str,
    cid: &'a str,
    caption_style: String,
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> MemeConfig {
        MemeConfig {
            use_memes: true,
            successful_restart_meme: dir.join("success.png"),
            unsuccessful_restart_meme: dir.join("boromir.jpg"),
            font_family: "Impact".into(),
        }
    }

    #[test]
    fn disabled_memes_have_no_assets() {
        let mut cfg = config(Path::new("/tmp"));
        cfg.use_memes = false;
        assert!(MemeAssets::from_config(&cfg).is_none());
    }

    #[test]
    fn failure_caption_names_node() {
        let c = caption(MemeKind::Failure, "xero01.example");
        assert_eq!(c.top, "ONE DOES NOT SIMPLY");
        assert_eq!(c.bottom, "RESTART XERO SERVICES ON xero01.example");
    }

    #[test]
    fn html_references_inline_image_and_escapes() {
        let assets = MemeAssets::from_config(&config(Path::new("/tmp"))).unwrap();
        assert_eq!(assets.font_family(), "Impact");
        let html = assets
            .render_html("down <now> & out", &caption(MemeKind::Failure, "xero01"))
            .unwrap();
        assert!(html.contains("cid:meme_image"));
        assert!(html.contains("down &lt;now&gt; &amp; out"));
        assert!(!html.contains("<now>"));
        assert!(html.contains("RESTART XERO SERVICES ON xero01"));
        assert!(html.contains("Impact,sans-serif"));
    }

    #[test]
    fn blank_font_family_falls_back_to_impact() {
        let mut cfg = config(Path::new("/tmp"));
        cfg.font_family = "  ".into();
        let assets = MemeAssets::from_config(&cfg).unwrap();
        assert_eq!(assets.font_family(), "Impact");
    }

    #[tokio::test]
    async fn load_reads_image_or_degrades() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("success.png"), b"\x89PNG").unwrap();
        let assets = MemeAssets::from_config(&config(dir.path())).unwrap();

        let image = assets.load(MemeKind::Success).await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.bytes, b"\x89PNG");

        assert!(assets.load(MemeKind::Failure).await.is_none());
    }
}
