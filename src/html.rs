//! HTML extraction for the harvested page families.
//!
//! Everything here is a pure function over a parsed [`Html`] tree. The
//! harvesters fetch, parse, call into this module, and drop the tree before
//! the next await point (`Html` is not `Send`).
//!
//! The structural markers these functions key on are the stable ones across
//! both sites: `ul.toc` and `ol.breadcrumb` on guidance pages, `ul.TocIndent`
//! and `span.sectionRange` on consolidated statutes, plain tables on the
//! guidance-document index.

use scraper::{ElementRef, Html, Selector};

const HEADING_NAMES: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

/// One leaf entry of a statute table of contents.
#[derive(Debug, Clone)]
pub struct TocLeaf {
    pub title: String,
    /// Raw href as found in the TOC.
    pub href: String,
    /// Anchor into the full-text page, when the href carries one. Leaves
    /// without a fragment cannot be sliced out of the full text.
    pub fragment: Option<String>,
    /// Normalized section number (`241`, `125-1`), when present.
    pub section_label: Option<String>,
    /// Ancestor part/division titles, topmost first.
    pub hierarchy: Vec<String>,
}

/// One row of a guidance-document index table.
#[derive(Debug, Clone)]
pub struct IpgRow {
    pub number: String,
    pub title: String,
    pub href: String,
    pub table_title: String,
}

/// Collapse all whitespace runs (including newlines) to single spaces.
pub fn flatten_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>()
}

fn is_heading(el: &ElementRef) -> bool {
    HEADING_NAMES.contains(&el.value().name())
}

fn child_elements<'a>(
    el: ElementRef<'a>,
    name: &'static str,
) -> impl Iterator<Item = ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(move |c| c.value().name() == name)
}

/// First `<h1>` text, or empty when the page has none.
pub fn page_title(doc: &Html) -> String {
    let h1_sel = Selector::parse("h1").unwrap();
    doc.select(&h1_sel)
        .next()
        .map(|h1| flatten_ws(&element_text(h1)))
        .unwrap_or_default()
}

/// Breadcrumb trail from `ol.breadcrumb`: section names and the hrefs of the
/// linked entries, in page order. Unlinked entries contribute a name only.
pub fn breadcrumb(doc: &Html) -> (Vec<String>, Vec<String>) {
    let li_sel = Selector::parse("ol.breadcrumb li").unwrap();
    let a_sel = Selector::parse("a").unwrap();

    let mut names = Vec::new();
    let mut urls = Vec::new();
    for li in doc.select(&li_sel) {
        let text = flatten_ws(&element_text(li));
        if !text.is_empty() {
            names.push(text);
        }
        if let Some(a) = li.select(&a_sel).next() {
            if let Some(href) = a.value().attr("href") {
                urls.push(href.to_string());
            }
        }
    }
    (names, urls)
}

/// Root-relative links of the first `ul.toc` list, in page order. An empty
/// result means the page has no table of contents and is a leaf.
pub fn toc_links(doc: &Html) -> Vec<String> {
    let toc_sel = Selector::parse("ul.toc").unwrap();
    let a_sel = Selector::parse("a[href]").unwrap();

    let Some(toc) = doc.select(&toc_sel).next() else {
        return Vec::new();
    };
    toc.select(&a_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.starts_with('/'))
        .map(str::to_string)
        .collect()
}

/// Main-content text (whitespace flattened) and the root-relative links found
/// inside `<main>`, de-duplicated preserving first occurrence. Pages without
/// a `<main>` element yield empty text and no links.
pub fn main_content(doc: &Html) -> (String, Vec<String>) {
    let main_sel = Selector::parse("main").unwrap();
    let a_sel = Selector::parse("a[href]").unwrap();

    let Some(main) = doc.select(&main_sel).next() else {
        return (String::new(), Vec::new());
    };

    let text = flatten_ws(&element_text(main));

    let mut links: Vec<String> = Vec::new();
    for a in main.select(&a_sel) {
        if let Some(href) = a.value().attr("href") {
            if href.starts_with('/') && !links.iter().any(|l| l == href) {
                links.push(href.to_string());
            }
        }
    }
    (text, links)
}

/// Walk the nested `ul.TocIndent` of a consolidated statute and return its
/// leaf entries. `root_label` is the topmost node's title (the Act name) and
/// is excluded from recorded hierarchies.
pub fn statute_toc_leaves(doc: &Html, root_label: &str) -> Vec<TocLeaf> {
    let toc_sel = Selector::parse("ul.TocIndent").unwrap();

    let Some(toc) = doc.select(&toc_sel).next() else {
        return Vec::new();
    };
    let mut leaves = Vec::new();
    walk_toc_list(toc, &[], root_label, &mut leaves);
    leaves
}

fn walk_toc_list(ul: ElementRef, hierarchy: &[String], root_label: &str, out: &mut Vec<TocLeaf>) {
    let span_sel = Selector::parse("span.sectionRange").unwrap();

    for li in child_elements(ul, "li") {
        // Entries without a direct link (spacer items) carry nothing
        let Some(a) = child_elements(li, "a").next() else {
            continue;
        };
        let title = flatten_ws(&element_text(a));
        let href = a.value().attr("href").unwrap_or("").to_string();

        if let Some(child_ul) = child_elements(li, "ul").next() {
            let mut child_hierarchy = hierarchy.to_vec();
            if title != root_label {
                child_hierarchy.push(title);
            }
            walk_toc_list(child_ul, &child_hierarchy, root_label, out);
            continue;
        }

        // Ranges read "241 - 244"; dotted numbers become hyphenated ("125.1" -> "125-1")
        let section_label = li
            .select(&span_sel)
            .next()
            .map(|span| {
                let text = flatten_ws(&element_text(span));
                let first = text.split('-').next().unwrap_or("").trim().to_string();
                first.replace('.', "-")
            })
            .filter(|label| !label.is_empty());

        let fragment = href
            .split_once('#')
            .map(|(_, fragment)| fragment.to_string());

        out.push(TocLeaf {
            title,
            href,
            fragment,
            section_label,
            hierarchy: hierarchy.to_vec(),
        });
    }
}

/// Slice one section out of a statute's full-text page.
///
/// Finds the heading whose `id` matches `fragment`, then collects text up to
/// the next heading. A heading wrapped in `<header>` (schedules) extends to
/// all of the header's following siblings instead. Returns `None` when no
/// heading carries the anchor.
pub fn section_text(doc: &Html, fragment: &str) -> Option<String> {
    let heading_sel =
        Selector::parse("h1[id], h2[id], h3[id], h4[id], h5[id], h6[id]").unwrap();

    let heading = doc
        .select(&heading_sel)
        .find(|h| h.value().attr("id") == Some(fragment))?;

    let header_ancestor = heading
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "header");

    let (root, stop_at_heading) = match header_ancestor {
        Some(header) => (header, false),
        None => (heading, true),
    };

    let mut parts = vec![block_text(root)];
    for sibling in root.next_siblings().filter_map(ElementRef::wrap) {
        if stop_at_heading && is_heading(&sibling) {
            break;
        }
        parts.push(block_text(sibling));
    }

    Some(flatten_ws(&parts.join("\n")))
}

/// Element text with fragments trimmed and joined by newlines, so that
/// [`flatten_ws`] leaves exactly one space between adjacent fragments.
fn block_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract guidance-document rows from every table on an index page.
///
/// A table's title is its `<caption>`, falling back to the closest preceding
/// `h2`/`h3`. Column positions come from scanning header cells for `Title`
/// and `Number`/`No.`, defaulting to the first two columns.
pub fn ipg_rows(doc: &Html) -> Vec<IpgRow> {
    let mut rows = Vec::new();
    let mut last_heading = String::new();

    for el in doc.root_element().descendants().filter_map(ElementRef::wrap) {
        match el.value().name() {
            "h2" | "h3" => last_heading = flatten_ws(&element_text(el)),
            "table" => rows.extend(table_rows(el, &last_heading)),
            _ => {}
        }
    }
    rows
}

fn table_rows(table: ElementRef, preceding_heading: &str) -> Vec<IpgRow> {
    let caption_sel = Selector::parse("caption").unwrap();
    let th_sel = Selector::parse("th").unwrap();
    let tr_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("td, th").unwrap();
    let a_sel = Selector::parse("a").unwrap();

    let table_title = table
        .select(&caption_sel)
        .next()
        .map(|c| flatten_ws(&element_text(c)))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| preceding_heading.to_string());

    let headers: Vec<String> = table.select(&th_sel).map(element_text).collect();
    let title_idx = headers
        .iter()
        .position(|h| h.contains("Title"))
        .unwrap_or(0);
    let number_idx = headers
        .iter()
        .position(|h| h.contains("Number") || h.contains("No."))
        .unwrap_or(1);

    let mut out = Vec::new();
    for row in table.select(&tr_sel).skip(1) {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        if cells.len() <= title_idx.max(number_idx) {
            continue;
        }

        let title_cell = cells[title_idx];
        let Some(link) = title_cell.select(&a_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        let title = flatten_ws(&element_text(title_cell));
        let number = flatten_ws(&element_text(cells[number_idx]));
        if href.is_empty() || title.is_empty() || number.is_empty() {
            continue;
        }

        out.push(IpgRow {
            number,
            title,
            href: href.to_string(),
            table_title: table_title.clone(),
        });
    }
    out
}
