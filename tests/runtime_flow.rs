use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use feature_runtime::{
    Document, Feature, FeatureContext, FeatureSetting, MemoryStore, NodeSpec, Page, Phase, Runtime,
    RuntimeConfig, SettingsSnapshot, SettingsStore, Teardown, TextHighlightFeature,
};
use serde_json::json;

/// Prepends a banner element and removes it again on cleanup.
struct Banner {
    teardown: Teardown,
}

#[async_trait]
impl Feature for Banner {
    fn name(&self) -> &'static str { "banner" }
    fn priority(&self) -> i32 { -10 }
    fn should_run(&self, _: &FeatureContext) -> Result<bool> { Ok(true) }

    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        let page = ctx.page.clone();
        let (doc_id, banner) = {
            let mut doc = page.document();
            let banner = doc.create_element_with("div", [("id".to_string(), "banner".to_string())]);
            let text = doc.create_text("welcome");
            doc.append_child(banner, text);
            let root = doc.root();
            let first = doc.children(root).first().copied();
            doc.insert_before(root, banner, first);
            (doc.id(), banner)
        };
        self.teardown.push(move || {
            let mut doc = page.document();
            if doc.id() == doc_id {
                doc.detach(banner);
            }
        });
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.teardown.drain();
        Ok(())
    }
}

fn document(value: serde_json::Value) -> Document {
    let nodes: Vec<NodeSpec> = serde_json::from_value(value).unwrap();
    Document::from_spec(&nodes)
}

fn article() -> Document {
    document(json!([
        {"tag": "h1", "children": ["Rust and more Rust"]},
        {"tag": "p", "children": ["Rust is a language."]}
    ]))
}

fn render(page: &Page) -> String {
    let doc = page.document();
    doc.render(doc.root())
}

fn runtime(page: &Page) -> Runtime {
    let rt = Runtime::new(RuntimeConfig::default(), page.clone());
    rt.register_feature(TextHighlightFeature::new).unwrap();
    rt.register_feature(|_| Banner { teardown: Teardown::new() }).unwrap();
    rt
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn settings_selection_and_navigation() {
    let page = Page::new("https://example.com/article", article());
    let original = render(&page);
    let rt = runtime(&page);
    let store = MemoryStore::new(SettingsSnapshot::from([(
        "text-highlight".to_string(),
        FeatureSetting::with_value(true, r#"{"excludeSelf":false}"#),
    )]));

    let affected = rt.reconcile(&store.fetch().await.unwrap(), false).await;
    assert_eq!(affected, ["text-highlight", "banner"]);
    assert!(render(&page).starts_with("<div id=\"banner\">welcome</div><h1>"));

    page.select_text("Rust").unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(render(&page).matches("<span").count(), 3);

    // Turning the banner off runs its cleanup and leaves highlights alone.
    let change = rt.update_setting("banner", false, None).await.unwrap();
    store.persist(&change).await.unwrap();
    let html = render(&page);
    assert!(!html.contains("banner"));
    assert_eq!(html.matches("<span").count(), 3);
    assert!(rt.reconcile(&store.fetch().await.unwrap(), false).await.is_empty());

    // In-page navigation re-runs every feature, which drops the highlights.
    let nav = rt.watch_navigation(rt.config().navigation_poll());
    page.navigate("https://example.com/article#part-2");
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(render(&page), original);
    assert_eq!(rt.descriptor("text-highlight").unwrap().stats.run_times, 2);

    // A full load swaps the document; highlighting continues on the new one.
    page.load("https://example.com/other", document(json!([
        {"tag": "p", "children": ["other words, other places"]}
    ])));
    let fresh = render(&page);
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(render(&page), fresh);

    page.select_text("other").unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(render(&page).matches("<span").count(), 2);

    nav.stop();
    rt.shutdown().await;
    assert_eq!(render(&page), fresh);
    assert!(rt.descriptors().iter().all(|d| d.stats.failures.is_empty()));
}

#[tokio::test]
async fn malformed_value_keeps_the_default() {
    let page = Page::new("https://example.com/", article());
    let rt = runtime(&page);
    let snapshot = SettingsSnapshot::from([
        ("text-highlight".to_string(), FeatureSetting::with_value(true, "{not json")),
        ("banner".to_string(), FeatureSetting::enabled(false)),
    ]);
    rt.reconcile(&snapshot, false).await;

    let hl = rt.descriptor("text-highlight").unwrap();
    assert_eq!(hl.stats.failures.len(), 1);
    assert_eq!(hl.stats.failures[0].phase, Phase::Configure);
    assert_eq!(hl.value, Some(feature_runtime::HighlightOptions::default().to_json()));
    assert_eq!(hl.stats.run_times, 1);

    let banner = rt.descriptor("banner").unwrap();
    assert!(!banner.enabled);
    assert_eq!(banner.stats.run_times, 0);
    assert!(!render(&page).contains("banner"));
    rt.shutdown().await;
}
