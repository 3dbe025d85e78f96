//! Server-rendered HTML index served at `/` to loopback callers.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::item::ItemMetadata;

pub fn render(items: &[ItemMetadata], carbon_saving: f64, download_saving: u64) -> String {
    let mut rows = String::new();
    for item in items {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}/{}</td><td>{}</td></tr>\n",
            html_escape(&item.basename),
            html_escape(&item.hash),
            item.size,
            item.share_count,
            if item.share_limit == crate::item::metadata::UNLIMITED {
                "\u{221e}".to_string()
            } else {
                item.share_limit.to_string()
            },
            if item.is_disabled() { "disabled" } else { "enabled" },
        ));
    }

    format!(
        "<!DOCTYPE html>\n\
<html><head><title>passim</title><link rel=\"stylesheet\" href=\"/style.css\"></head>\n\
<body>\n\
<h1>passim</h1>\n\
<p>{} item(s) cached, {} byte(s) served, {:.3} kg CO\u{2082}e saved</p>\n\
<table border=\"1\">\n\
<tr><th>basename</th><th>hash</th><th>size</th><th>shares</th><th>status</th></tr>\n\
{rows}\
</table>\n\
</body></html>\n",
        items.len(),
        download_saving,
        carbon_saving,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
