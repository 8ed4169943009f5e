use std::fmt::Write;

use super::{ReportDocument, ReportSection};
use crate::model::common::role::Role;

/// Shown in place of an answer that was never given.
pub const NO_ANSWER: &str = "(no answer)";

const STYLE: &str = "\
body { font-family: sans-serif; margin: 2em; color: #222; }
h1 { margin-bottom: 0.2em; }
.subtitle { font-size: 1.2em; margin: 0; }
.date { color: #666; margin-top: 0.2em; }
section { margin-top: 2em; }
ol { padding-left: 1.5em; }
li { margin-bottom: 1em; }
.question { font-weight: bold; }
.answer { white-space: pre-wrap; margin: 0.3em 0 0; }
.missing { color: #999; font-style: italic; }";

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn heading(role: Role) -> &'static str {
    match role {
        Role::Teacher => "Teacher's answers",
        Role::Student => "Student's answers",
    }
}

fn render_section(out: &mut String, section: &ReportSection) {
    let _ = writeln!(out, "<section class=\"{}\">", section.role);
    let _ = writeln!(out, "<h2>{}</h2>", heading(section.role));
    out.push_str("<ol>\n");
    for item in &section.items {
        let _ = write!(
            out,
            "<li value=\"{}\"><p class=\"question\">{}</p>",
            item.number,
            escape(&item.question)
        );
        match &item.answer {
            Some(answer) => {
                let _ = write!(out, "<p class=\"answer\">{}</p>", escape(answer));
            }
            None => {
                let _ = write!(out, "<p class=\"answer missing\">{NO_ANSWER}</p>");
            }
        }
        out.push_str("</li>\n");
    }
    out.push_str("</ol>\n</section>\n");
}

/// Render a report as a self-contained HTML page.
pub fn render(document: &ReportDocument) -> String {
    let teacher = escape(&document.teacher_name);
    let student = escape(&document.student_name);
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(out, "<title>Icebreaker report: {teacher} &amp; {student}</title>");
    let _ = writeln!(out, "<style>\n{STYLE}\n</style>\n</head>\n<body>");
    out.push_str("<h1>Icebreaker report</h1>\n");
    let _ = writeln!(out, "<p class=\"subtitle\">{teacher} &amp; {student}</p>");
    let _ = writeln!(
        out,
        "<p class=\"date\">Match {} created {}</p>",
        escape(&document.match_id),
        document.created_at.format("%Y-%m-%d")
    );
    for section in &document.sections {
        render_section(&mut out, section);
    }
    out.push_str("</body>\n</html>\n");
    out
}
