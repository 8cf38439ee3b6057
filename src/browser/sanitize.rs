//! Static snapshot sanitization.
//!
//! Turns a serialized, fully executed document into something safe to serve
//! from cache: scripts that would re-run are dropped, structured data is
//! kept, and root-relative references are pinned to the page's origin.

use std::cell::Cell;
use std::rc::Rc;

use lol_html::html_content::ContentType;
use lol_html::{doc_comments, element, rewrite_str, RewriteStrSettings};
use url::Url;

use crate::{GatewayError, Result};

const JSON_LD: &str = "application/ld+json";

pub fn sanitize_document(html: &str, page_url: &Url) -> Result<String> {
    let origin = page_url.origin().ascii_serialization();
    let has_base = Rc::new(Cell::new(false));

    let cleaned = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("script", |el| {
                    let keep = el
                        .get_attribute("type")
                        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case(JSON_LD));
                    if !keep {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("link[rel=import]", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("base", {
                    let has_base = Rc::clone(&has_base);
                    move |_el| {
                        has_base.set(true);
                        Ok(())
                    }
                }),
                element!("link[href^='/']", {
                    let origin = origin.clone();
                    move |el| {
                        if let Some(href) = el.get_attribute("href") {
                            if is_root_relative(&href) {
                                el.set_attribute("href", &format!("{origin}{href}"))?;
                            }
                        }
                        Ok(())
                    }
                }),
                element!("img[src^='/']", {
                    let origin = origin.clone();
                    move |el| {
                        if let Some(src) = el.get_attribute("src") {
                            if is_root_relative(&src) {
                                el.set_attribute("src", &format!("{origin}{src}"))?;
                            }
                        }
                        Ok(())
                    }
                }),
            ],
            document_content_handlers: vec![doc_comments!(|comment| {
                comment.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| GatewayError::navigation(format!("failed to sanitize document: {err}")))?;

    if has_base.get() {
        return Ok(cleaned);
    }

    let base_tag = format!(
        "<base href=\"{}\">",
        escape_attribute(&format!("{origin}{}", page_url.path()))
    );
    rewrite_str(
        &cleaned,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", move |el| {
                el.prepend(&base_tag, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| GatewayError::navigation(format!("failed to inject base element: {err}")))
}

/// `/path` but not protocol-relative `//host/path`.
fn is_root_relative(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next() == Some('/') && chars.next().is_some_and(|c| c != '/')
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
