//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Status column text for a check result.
pub fn status_label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "MISSING"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_renders_headers_and_rows() {
        let mut table = new_table(&["CHECK", "STATUS"]);
        table.add_row(vec!["dnsmasq", status_label(true)]);
        table.add_row(vec!["etcd", status_label(false)]);

        let rendered = table.to_string();
        assert!(rendered.contains("CHECK"));
        assert!(rendered.contains("dnsmasq"));
        assert!(rendered.contains("MISSING"));
    }
}
