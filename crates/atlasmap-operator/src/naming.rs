//! Names, hosts and display text derived from an AtlasMap

use kube::ResourceExt;

use crate::config::PRODUCT_NAME;
use crate::crd::AtlasMap;

/// Host for the Ingress rule: `spec.routeHostName`, else `<name>-<namespace>`
pub fn ingress_host(atlasmap: &AtlasMap) -> String {
    if atlasmap.spec.route_host_name.is_empty() {
        format!(
            "{}-{}",
            atlasmap.name_any(),
            atlasmap.namespace().unwrap_or_default()
        )
    } else {
        atlasmap.spec.route_host_name.clone()
    }
}

/// Name of the cluster-scoped ConsoleLink for an AtlasMap
pub fn console_link_name(name: &str, namespace: &str) -> String {
    format!("{name}-{namespace}")
}

/// Image reference from repository and tag
pub fn image_name(image: &str, tag: &str) -> String {
    format!("{image}:{tag}")
}

/// Display title for the ConsoleLink.
///
/// `atlasmap-example`, `example-atlasmap` and `atlasmap-example-atlasmap` all
/// become `AtlasMap - Example`.
pub fn console_link_text(name: &str) -> String {
    let token = PRODUCT_NAME.to_lowercase();
    let words = name.to_lowercase().replace('-', " ");
    let words = words.strip_prefix(token.as_str()).unwrap_or(&words);
    let words = words.strip_suffix(token.as_str()).unwrap_or(words);

    format!("{PRODUCT_NAME} - {}", title_case(words).trim())
}

/// Upper-case the first letter of every word
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }
    out
}
