//! Always-available templated output.
//!
//! When the circuit is open, a pipeline fails without a usable artifact, or a
//! request waits past the queue deadline, the runtime still owes the caller
//! *some* image. The fallback generator derives a deterministic geometric
//! composition from a hash of the prompt: no external calls, no failure
//! modes beyond allocation. Unavailability of this path is the one fatal
//! error in the system, which is why it stays this small.

use std::io::Cursor;

use bytes::Bytes;
use image::{ImageBuffer, ImageFormat, Rgb};
use sha2::{Digest, Sha256};

use crate::stage::StageArtifact;

const PREVIEW_SIZE: u32 = 64;
const CANVAS: u32 = 512;

/// Deterministic, cheap artifact source of last resort.
#[derive(Debug, Clone, Default)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Produce a templated vector composition for the prompt. Always
    /// succeeds; identical inputs give identical artifacts.
    pub fn generate(&self, prompt: &str, style: Option<&str>) -> StageArtifact {
        let digest = seed(prompt, style);
        let palette = [
            color(&digest, 0),
            color(&digest, 3),
            color(&digest, 6),
        ];
        let background = color(&digest, 9);

        let mut shapes = String::new();
        for i in 0..6usize {
            let b = |n: usize| digest[(10 + i * 3 + n) % digest.len()] as u32;
            let cx = b(0) * CANVAS / 255;
            let cy = b(1) * CANVAS / 255;
            let r = 24 + b(2) * (CANVAS / 6) / 255;
            let fill = &palette[i % palette.len()];
            if i % 2 == 0 {
                shapes.push_str(&format!(
                    "  <circle cx=\"{cx}\" cy=\"{cy}\" r=\"{r}\" fill=\"{fill}\" opacity=\"0.8\"/>\n"
                ));
            } else {
                shapes.push_str(&format!(
                    "  <rect x=\"{}\" y=\"{}\" width=\"{r}\" height=\"{r}\" fill=\"{fill}\" opacity=\"0.8\"/>\n",
                    cx.saturating_sub(r / 2),
                    cy.saturating_sub(r / 2),
                ));
            }
        }

        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{CANVAS}\" height=\"{CANVAS}\" \
             viewBox=\"0 0 {CANVAS} {CANVAS}\">\n  <title>{}</title>\n  \
             <rect width=\"{CANVAS}\" height=\"{CANVAS}\" fill=\"{background}\"/>\n{shapes}</svg>\n",
            escape_xml(prompt),
        );

        let preview = render_preview_from_digest(&digest);
        StageArtifact::svg(svg)
            .with_preview(preview)
            .with_detail_score(0.1)
    }
}

/// Deterministic PNG preview for an artifact that arrived without one.
/// Proper rasterization belongs to the engines; this is a palette swatch
/// derived from the document text, good enough for listings and caches.
pub fn render_preview(svg: &str) -> Bytes {
    render_preview_from_digest(&seed(svg, None))
}

fn seed(text: &str, style: Option<&str>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    if let Some(style) = style {
        hasher.update(b"\x1f");
        hasher.update(style.as_bytes());
    }
    hasher.finalize().into()
}

fn render_preview_from_digest(digest: &[u8; 32]) -> Bytes {
    let bands = [
        rgb(digest, 0),
        rgb(digest, 3),
        rgb(digest, 6),
        rgb(digest, 9),
    ];
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(PREVIEW_SIZE, PREVIEW_SIZE, |x, _y| {
            let band = (x * bands.len() as u32 / PREVIEW_SIZE) as usize;
            Rgb(bands[band.min(bands.len() - 1)])
        });
    let mut out = Vec::new();
    if let Err(err) = img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png) {
        // Encoding a tiny in-memory PNG has no real failure mode; degrade to
        // an empty preview rather than surface an error from the last-resort
        // path.
        tracing::warn!(%err, "preview encoding failed");
        return Bytes::new();
    }
    Bytes::from(out)
}

fn rgb(digest: &[u8; 32], offset: usize) -> [u8; 3] {
    [
        digest[offset % 32],
        digest[(offset + 1) % 32],
        digest[(offset + 2) % 32],
    ]
}

fn color(digest: &[u8; 32], offset: usize) -> String {
    let [r, g, b] = rgb(digest, offset);
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let gen = FallbackGenerator::new();
        let a = gen.generate("a red lighthouse", Some("flat"));
        let b = gen.generate("a red lighthouse", Some("flat"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_prompts_differ() {
        let gen = FallbackGenerator::new();
        let a = gen.generate("a red lighthouse", None);
        let b = gen.generate("a blue lighthouse", None);
        assert_ne!(a.svg, b.svg);
    }

    #[test]
    fn test_style_feeds_seed() {
        let gen = FallbackGenerator::new();
        let a = gen.generate("a fox", Some("flat"));
        let b = gen.generate("a fox", Some("sketch"));
        assert_ne!(a.svg, b.svg);
    }

    #[test]
    fn test_artifact_is_valid_svg_shell() {
        let artifact = FallbackGenerator::new().generate("hills & <valleys>", None);
        assert!(artifact.svg.starts_with("<svg"));
        assert!(artifact.svg.ends_with("</svg>\n"));
        assert!(artifact.svg.contains("&amp;"));
        assert!(artifact.svg.contains("&lt;valleys&gt;"));
    }

    #[test]
    fn test_preview_is_png() {
        let artifact = FallbackGenerator::new().generate("a fox", None);
        let preview = artifact.preview.expect("fallback always carries a preview");
        assert_eq!(&preview[1..4], b"PNG");
    }

    #[test]
    fn test_render_preview_from_svg_text() {
        let preview = render_preview("<svg></svg>");
        assert!(!preview.is_empty());
    }
}
