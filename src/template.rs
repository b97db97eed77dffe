//! Message templating: `{placeholder}` substitution and the token block.

use std::path::Path;

use tracing::warn;

/// Replace each `{name}` whose name is in `vars`. Unknown placeholders and
/// stray braces are kept verbatim.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let name = &after[..close];
                match vars.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            // Unclosed, or reopened before closing: the brace is literal.
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Human-readable token block appended to every outbound body.
pub fn token_block(token: &str) -> String {
    format!("<br><br><p><small><b>Token:</b> {token}</small></p>")
}

/// Final HTML body: rendered text, token block, then the optional signature.
pub fn compose_body(rendered: &str, token: &str, signature: Option<&str>) -> String {
    let mut body = format!("{rendered}{}", token_block(token));
    if let Some(sig) = signature.filter(|s| !s.trim().is_empty()) {
        body.push_str("<br><br>");
        body.push_str(sig);
    }
    body
}

/// Read an HTML template, or an empty string when it cannot be read.
pub fn load_html(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return String::new();
    };
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(e) => {
            warn!(path = %path.display(), "Template not readable, using empty text: {e}");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn render_substitutes_known_names() {
        let out = render(
            "Auditoria – Cliente {nome_cliente} – {cod_cliente}",
            &[("nome_cliente", "ACME"), ("cod_cliente", "1001")],
        );
        assert_eq!(out, "Auditoria – Cliente ACME – 1001");
    }

    #[test]
    fn render_keeps_unknown_and_unbalanced() {
        assert_eq!(render("{x} and {y", &[("z", "1")]), "{x} and {y");
        assert_eq!(render("a{}b", &[]), "a{}b");
    }

    #[test]
    fn stray_brace_does_not_hide_next_placeholder() {
        let vars = [("nome_cliente", "ACME")];
        assert_eq!(render("a { b {nome_cliente}", &vars), "a { b ACME");
        assert_eq!(render("{{nome_cliente}}", &vars), "{ACME}");
    }

    #[test]
    fn body_has_token_before_signature() {
        let body = compose_body("<p>Hi</p>", "PERF-1", Some("<p>Risk team</p>"));
        let token_at = body.find("PERF-1").unwrap();
        let sig_at = body.find("Risk team").unwrap();
        assert!(token_at < sig_at);
        assert!(body.contains("<b>Token:</b> PERF-1"));
    }

    #[test]
    fn missing_template_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_html(Some(&dir.path().join("none.html"))), "");
        assert_eq!(load_html(None), "");
        assert_eq!(compose_body("", "T", None), token_block("T"));
    }
}
