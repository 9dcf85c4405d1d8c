//! Image-reference rewriting: a pure text pass over extracted Markdown.
//!
//! Every result archive names its images relative to its own `images/`
//! folder, so two files' documents can both reference `images/figure.png`.
//! Prefixing each reference (and the extracted file, see
//! [`crate::pipeline::materialize`]) with the file's zero-padded sequence
//! index makes names unique across the whole batch by construction.
//!
//! The pass is deliberately narrow: only Markdown image markup
//! (`![alt](path)`) whose path starts with the conventional `images/`
//! prefix is touched. External URLs and other relative paths stay as the
//! service produced them.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// The image-folder prefix result archives use by convention.
const IMAGE_PREFIX: &str = "images/";

/// Image markup: `![`, alt text up to `]`, `(`, path up to `)`.
static RE_IMAGE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

/// Rewrite `![alt](images/name)` references to
/// `![alt](images/{index:04}_name)`.
///
/// Pure function over text; paths outside the `images/` convention are
/// left untouched.
pub fn rewrite_image_paths(markdown: &str, index: usize) -> String {
    RE_IMAGE_REF
        .replace_all(markdown, |caps: &Captures| {
            let alt = &caps[1];
            let path = &caps[2];
            match path.strip_prefix(IMAGE_PREFIX) {
                Some(rest) => format!("![{alt}](images/{index:04}_{rest})"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
