//! Web-harvester tests that serve canned canada.ca / laws-lois style pages
//! from a local HTTP server and drive the compiled `lkb` binary against it.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;

use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;

fn lkb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("lkb");
    path
}

fn run_lkb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lkb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lkb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

async fn run_lkb_blocking(config_path: PathBuf, args: Vec<String>) -> (String, String, bool) {
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_lkb(&config_path, &args)
    })
    .await
    .unwrap()
}

// ============================================================================
// Canned pages
// ============================================================================

const GUIDE_TOC: &str = r#"<html><body>
<h1>Guide to federal labour standards</h1>
<main>
  <ul class="toc lst-spcd">
    <li><a href="/en/guide/hours.html">Hours of work</a></li>
    <li><a href="/en/guide/vacation.html">Annual vacation</a></li>
  </ul>
</main>
</body></html>"#;

const GUIDE_HOURS: &str = r#"<html><body>
<ol class="breadcrumb">
  <li><a href="/en.html">Canada.ca</a></li>
  <li><a href="/en/services/jobs.html">Jobs and the workplace</a></li>
</ol>
<h1>Hours of work</h1>
<main>
  <p>Standard hours of work are eight in a day and forty in a week.</p>
  <p>See the rules for <a href="/en/guide/averaging.html">averaging agreements</a>.</p>
  <p>Related <a href="/en/news/2024-update.html">news release</a>.</p>
</main>
</body></html>"#;

const GUIDE_AVERAGING: &str = r#"<html><body>
<h1>Averaging agreements</h1>
<main>
  <p>Hours may be averaged over two or more weeks where the nature of the
  work requires irregular distribution.</p>
</main>
</body></html>"#;

const GUIDE_VACATION: &str = r#"<html><body>
<h1>Annual vacation</h1>
<main>
  <p>Employees earn at least two weeks of vacation with pay each year.</p>
  <p>Back to <a href="/en/guide/hours.html">hours of work</a>.</p>
</main>
</body></html>"#;

const STATUTE_TOC: &str = r#"<html><body><main>
<ul class="TocIndent">
  <li><a href="/statute/toc.html">Test Labour Act</a>
    <ul>
      <li><a href="/statute/FullText.html">Part I</a>
        <ul>
          <li><span class="sectionRange">7</span>
              <a href="/statute/FullText.html#sec-7">Complaint to the Board</a></li>
          <li><span class="sectionRange">9</span>
              <a href="/statute/FullText.html#sec-9">Duty of fair representation</a></li>
        </ul>
      </li>
      <li><a href="/statute/FullText.html#sched-1">SCHEDULE</a></li>
    </ul>
  </li>
</ul>
</main></body></html>"#;

const STATUTE_FULL: &str = r#"<html><body><main>
<h2 id="sec-7">7 Complaint to the Board</h2>
<p>Any employee may make a complaint in writing to the Board.</p>
<h2 id="sec-9">9 Duty of fair representation</h2>
<p>The union shall not act in a manner that is arbitrary or discriminatory
toward any employee in the unit.</p>
<header><h2 id="sched-1">SCHEDULE</h2></header>
<p>Provisions respecting the longshoring industry.</p>
</main></body></html>"#;

const IPG_INDEX: &str = r#"<html><body>
<h1>Interpretations, policies and guidelines</h1>
<main>
  <table>
    <caption>Current publications</caption>
    <tr><th>Number</th><th>Title</th></tr>
    <tr><td>IPG-054</td><td><a href="/en/ipg/ipg-054.html">Fatigue of motor vehicle operators</a></td></tr>
    <tr><td>IPG-101</td><td><a href="/en/ipg/ipg-101.html">Scope of application</a></td></tr>
  </table>
</main>
</body></html>"#;

const IPG_054: &str = r#"<html><body>
<h1>Fatigue of motor vehicle operators</h1>
<main>
  <p>Guidance on hours of service and fatigue of motor vehicle operators.</p>
</main>
</body></html>"#;

const IPG_101: &str = r#"<html><body>
<h1>Scope of application</h1>
<main>
  <p>Which undertakings fall within the federal jurisdiction.</p>
</main>
</body></html>"#;

const PLAIN_PAGE: &str = r#"<html><body>
<h1>Not a table of contents</h1>
<main><p>Nothing indexed here.</p></main>
</body></html>"#;

fn test_router() -> Router {
    Router::new()
        .route("/en/guide.html", get(|| async { Html(GUIDE_TOC) }))
        .route("/en/guide/hours.html", get(|| async { Html(GUIDE_HOURS) }))
        .route(
            "/en/guide/averaging.html",
            get(|| async { Html(GUIDE_AVERAGING) }),
        )
        .route(
            "/en/guide/vacation.html",
            get(|| async { Html(GUIDE_VACATION) }),
        )
        .route("/statute/toc.html", get(|| async { Html(STATUTE_TOC) }))
        .route(
            "/statute/FullText.html",
            get(|| async { Html(STATUTE_FULL) }),
        )
        .route("/ipg/index.html", get(|| async { Html(IPG_INDEX) }))
        .route("/en/ipg/ipg-054.html", get(|| async { Html(IPG_054) }))
        .route("/en/ipg/ipg-101.html", get(|| async { Html(IPG_101) }))
        .route("/plain.html", get(|| async { Html(PLAIN_PAGE) }))
}

async fn start_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, test_router()).await.unwrap();
    });
    addr
}

fn setup_env(origin: &str, sources: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_content = format!(
        r#"[db]
path = "{root}/data/lkb.sqlite"

[harvest]
base_url = "{origin}"
max_depth = 1
concurrent_fetches = 4
timeout_secs = 10

[chunking]
max_tokens = 700

[retrieval]
final_limit = 12

[server]
bind = "127.0.0.1:7440"

{sources}
"#,
        root = root.display(),
        origin = origin,
        sources = sources
    );

    let config_path = root.join("lkb.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_guide_tree() {
    let addr = start_server().await;
    let origin = format!("http://{}", addr);
    let sources = format!(
        r#"[[sources.guides]]
name = "standards"
id_prefix = "LAB"
root_url = "{origin}/en/guide.html"
"#,
        origin = origin
    );
    let (_tmp, config_path) = setup_env(&origin, &sources);

    run_lkb_blocking(config_path.clone(), vec!["init".into()]).await;
    let (stdout, stderr, success) = run_lkb_blocking(
        config_path.clone(),
        vec!["harvest".into(), "guide:standards".into()],
    )
    .await;

    assert!(
        success,
        "harvest failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("harvest guide:standards"));
    // The TOC page itself is not recorded; its two chapters plus the one
    // fan-out page make three. The /en/news/ link is excluded from crawling.
    assert!(stdout.contains("records stored: 3"), "got: {}", stdout);
    assert!(
        !stderr.contains("Warning"),
        "no page should have failed: {}",
        stderr
    );

    // TOC entries are walked in page order, fan-out after its parent
    let (get1, _, ok1) =
        run_lkb_blocking(config_path.clone(), vec!["get".into(), "LAB-1".into()]).await;
    assert!(ok1);
    assert!(get1.contains("Hours of work"));
    assert!(get1.contains("Canada.ca / Jobs and the workplace"));
    // Crawl exclusion does not drop the link from the record itself
    assert!(get1.contains("/en/news/2024-update.html"));

    let (get2, _, ok2) =
        run_lkb_blocking(config_path.clone(), vec!["get".into(), "LAB-2".into()]).await;
    assert!(ok2);
    assert!(get2.contains("Averaging agreements"));

    let (get3, _, ok3) =
        run_lkb_blocking(config_path.clone(), vec!["get".into(), "LAB-3".into()]).await;
    assert!(ok3);
    assert!(get3.contains("Annual vacation"));

    let (search_out, _, _) = run_lkb_blocking(
        config_path.clone(),
        vec!["search".into(), "averaging".into()],
    )
    .await;
    assert!(search_out.contains("id: LAB-2"), "got: {}", search_out);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_statute_sections() {
    let addr = start_server().await;
    let origin = format!("http://{}", addr);
    let sources = format!(
        r#"[[sources.statutes]]
name = "tla"
id_prefix = "TLA"
toc_url = "{origin}/statute/toc.html"
full_text_url = "{origin}/statute/FullText.html"
root_label = "Test Labour Act"
"#,
        origin = origin
    );
    let (_tmp, config_path) = setup_env(&origin, &sources);

    run_lkb_blocking(config_path.clone(), vec!["init".into()]).await;
    let (stdout, stderr, success) =
        run_lkb_blocking(config_path.clone(), vec!["harvest".into(), "tla".into()]).await;

    assert!(
        success,
        "harvest failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("3 leaf entries in contents"));
    assert!(stdout.contains("records stored: 3"), "got: {}", stdout);

    // Section numbers become the IDs
    let (get7, _, ok7) =
        run_lkb_blocking(config_path.clone(), vec!["get".into(), "TLA-7".into()]).await;
    assert!(ok7, "TLA-7 missing: {}", get7);
    assert!(get7.contains("Complaint to the Board"));
    assert!(get7.contains("section:        7"));
    assert!(get7.contains("Part I"));
    assert!(get7.contains("#sec-7"));
    assert!(get7.contains("complaint in writing"));
    assert!(!get7.contains("fair representation"));

    // Unnumbered leaves fall back to a positional schedule ID
    let (sched, _, ok_sched) = run_lkb_blocking(
        config_path.clone(),
        vec!["get".into(), "TLA-SCHEDULE-1".into()],
    )
    .await;
    assert!(ok_sched, "TLA-SCHEDULE-1 missing: {}", sched);
    assert!(sched.contains("longshoring"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_statute_without_toc_fails() {
    let addr = start_server().await;
    let origin = format!("http://{}", addr);
    let sources = format!(
        r#"[[sources.statutes]]
name = "tla"
id_prefix = "TLA"
toc_url = "{origin}/plain.html"
full_text_url = "{origin}/statute/FullText.html"
root_label = "Test Labour Act"
"#,
        origin = origin
    );
    let (_tmp, config_path) = setup_env(&origin, &sources);

    run_lkb_blocking(config_path.clone(), vec!["init".into()]).await;
    let (_, stderr, success) =
        run_lkb_blocking(config_path.clone(), vec!["harvest".into(), "tla".into()]).await;

    assert!(!success, "harvest should fail without a TOC");
    assert!(
        stderr.contains("No table of contents"),
        "got: {}",
        stderr
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_ipg_index() {
    let addr = start_server().await;
    let origin = format!("http://{}", addr);
    let sources = format!(
        r#"[[sources.ipgs]]
name = "ipgs"
index_url = "{origin}/ipg/index.html"
"#,
        origin = origin
    );
    let (_tmp, config_path) = setup_env(&origin, &sources);

    run_lkb_blocking(config_path.clone(), vec!["init".into()]).await;
    let (stdout, stderr, success) =
        run_lkb_blocking(config_path.clone(), vec!["harvest".into(), "ipg".into()]).await;

    assert!(
        success,
        "harvest failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("2 documents listed"));
    assert!(stdout.contains("records stored: 2"), "got: {}", stdout);

    // Published numbers are the IDs; the table caption is the hierarchy
    let (get_out, _, ok) =
        run_lkb_blocking(config_path.clone(), vec!["get".into(), "IPG-054".into()]).await;
    assert!(ok, "IPG-054 missing: {}", get_out);
    assert!(get_out.contains("Fatigue of motor vehicle operators"));
    assert!(get_out.contains("Current publications"));
    assert!(get_out.contains("hours of service"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_guide_root_fetch_failure_is_skipped() {
    let addr = start_server().await;
    let origin = format!("http://{}", addr);
    let sources = format!(
        r#"[[sources.guides]]
name = "standards"
id_prefix = "LAB"
root_url = "{origin}/en/missing.html"
"#,
        origin = origin
    );
    let (_tmp, config_path) = setup_env(&origin, &sources);

    run_lkb_blocking(config_path.clone(), vec!["init".into()]).await;
    let (stdout, stderr, success) = run_lkb_blocking(
        config_path.clone(),
        vec!["harvest".into(), "guide".into()],
    )
    .await;

    // A failed page is logged and skipped, not fatal
    assert!(success, "stderr: {}", stderr);
    assert!(stderr.contains("Warning: skipping"));
    assert!(stdout.contains("records stored: 0"));
}
