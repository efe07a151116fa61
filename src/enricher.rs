//! C3: semantic enricher. Classifies native vs. web clicks, infers an
//! `ActionContext`, and buckets apps/content into coarse semantic categories.
//!
//! Grounded on the teacher's `selected_text.rs` (role/label extraction shape,
//! graceful-degradation-under-missing-permission posture) and
//! `ch1kim0n1-CosmoCorral`'s `models.rs` field taxonomy for UI-element and
//! content metadata (its random-data generation is not carried over; only
//! the struct shape and the idea of a deterministic classifier are kept).

use std::time::{Duration, Instant};

use regex::Regex;
use std::sync::OnceLock;

use crate::capture::accessibility::{infer_action_context, ElementInspector};
use crate::model::{ClickPath, ClickTarget, EventContext, NativeClick, Point, WebClick};

fn form_element_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(input|select|textarea|option)$").unwrap())
}

/// Classifies a DOM click target captured by the browser bridge into a
/// [`WebClick`] with derived `is_button`/`is_link`/`is_form_element`/
/// `appears_clickable` flags (spec §4.3).
pub fn classify_web_click(
    url: &str,
    title: &str,
    tag: &str,
    selector: &str,
    text: &str,
    href: Option<String>,
    aria_label: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
) -> WebClick {
    let tag_lower = tag.to_lowercase();
    let is_button = tag_lower == "button"
        || classes.iter().any(|c| c.to_lowercase().contains("btn"))
        || aria_label
            .as_deref()
            .map(|l| l.to_lowercase().contains("button"))
            .unwrap_or(false);
    let is_link = tag_lower == "a" && href.is_some();
    let is_form_element = form_element_re().is_match(&tag_lower);
    let appears_clickable = is_button || is_link || href.is_some();

    WebClick {
        url: url.to_string(),
        title: title.to_string(),
        tag: tag.to_string(),
        selector: selector.to_string(),
        text: text.to_string(),
        href,
        aria_label,
        id,
        classes,
        is_button,
        is_link,
        is_form_element,
        appears_clickable,
    }
}

/// Enriches a native (non-web) click via an [`ElementInspector`], applying a
/// hard timeout per spec §7 (`EnrichmentTimeout` must never block the
/// pipeline). Returns `None` if inspection times out or the inspector
/// declines (no element at point). Permission denial is not such a decline —
/// the inspector itself degrades to a `role=unknown` shell rather than
/// returning `None`, so a click event is still produced.
pub fn enrich_native_click(
    inspector: &dyn ElementInspector,
    point: Point,
    timeout: Duration,
) -> Option<NativeClick> {
    let started = Instant::now();
    let result = inspector.inspect_at(point);
    if started.elapsed() > timeout {
        return None;
    }
    result.map(|mut click| {
        let (semantic_type, confidence) = classify_semantic_type(&click);
        click.semantic_type = semantic_type;
        click.confidence = confidence;
        if click.action_context.is_none() {
            click.action_context = infer_action_context(&click.role, click.label.as_deref());
        }
        click
    })
}

/// Ordered keyword-and-context classifier over `(element text, sibling
/// texts, parent role, element role)` (spec §4.3). Deterministic,
/// first-match-wins, no randomness or LLM. `role=unknown` (the accessibility
/// inspector's permission-denied shell) is not one of the seven named types
/// and short-circuits straight to the degraded tag.
pub fn classify_semantic_type(click: &NativeClick) -> (String, f32) {
    if click.role.eq_ignore_ascii_case("unknown") {
        return ("unknown".to_string(), 0.1);
    }

    let sibling_text = click.sibling_texts.join(" ");
    let haystack = format!(
        "{} {} {} {} {}",
        click.role,
        click.label.as_deref().unwrap_or_default(),
        click.identifier.as_deref().unwrap_or_default(),
        click.parent_context.as_deref().unwrap_or_default(),
        sibling_text,
    )
    .to_lowercase();
    let role_lower = click.role.to_lowercase();

    if haystack.contains("email") || haystack.contains("mail") {
        return ("email_button".to_string(), 0.85);
    }
    if haystack.contains("note") {
        return ("note_button".to_string(), 0.8);
    }
    if haystack.contains("send") || haystack.contains("submit") {
        return ("send_button".to_string(), 0.9);
    }
    if haystack.contains("save") {
        return ("save_button".to_string(), 0.9);
    }
    if role_lower == "link" || haystack.contains("navigate") || haystack.contains("back") || haystack.contains("link") {
        return ("navigation_link".to_string(), 0.75);
    }
    if role_lower == "button" {
        return ("generic_button".to_string(), 0.6);
    }
    ("interactive_element".to_string(), 0.4)
}

/// Assembles a full [`ClickTarget`] from either enrichment path. Exactly one
/// of `native`/`web` must be `Some` (spec §3's native-XOR-web invariant);
/// `web` takes precedence when both are somehow supplied, since a browser
/// click can never also be a native accessibility element.
pub fn assemble_click_target(
    coordinates: Point,
    context: &EventContext,
    native: Option<NativeClick>,
    web: Option<WebClick>,
) -> Option<ClickTarget> {
    let path = match (web, native) {
        (Some(w), _) => ClickPath::Web(w),
        (None, Some(n)) => ClickPath::Native(n),
        (None, None) => return None,
    };
    Some(ClickTarget {
        coordinates,
        app: context.active_app.clone(),
        window_title: context.active_window.clone(),
        path,
    })
}

/// Coarse semantic category used for app-usage bucketing in interval
/// summaries (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCategory {
    Communication,
    Development,
    Browser,
    Productivity,
    Design,
    Other,
}

pub fn categorize_app(app_name: &str) -> AppCategory {
    let name = app_name.to_lowercase();
    let table: &[(&str, AppCategory)] = &[
        ("slack", AppCategory::Communication),
        ("mail", AppCategory::Communication),
        ("messages", AppCategory::Communication),
        ("zoom", AppCategory::Communication),
        ("code", AppCategory::Development),
        ("terminal", AppCategory::Development),
        ("xcode", AppCategory::Development),
        ("iterm", AppCategory::Development),
        ("safari", AppCategory::Browser),
        ("chrome", AppCategory::Browser),
        ("firefox", AppCategory::Browser),
        ("notes", AppCategory::Productivity),
        ("notion", AppCategory::Productivity),
        ("calendar", AppCategory::Productivity),
        ("figma", AppCategory::Design),
        ("sketch", AppCategory::Design),
    ];
    table
        .iter()
        .find(|(key, _)| name.contains(key))
        .map(|(_, cat)| *cat)
        .unwrap_or(AppCategory::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::accessibility::ElementInspector;

    struct FakeInspector(Option<NativeClick>);
    impl ElementInspector for FakeInspector {
        fn inspect_at(&self, _point: Point) -> Option<NativeClick> {
            self.0.clone()
        }
    }

    fn sample_native() -> NativeClick {
        NativeClick {
            role: "button".into(),
            label: Some("Send message".into()),
            identifier: None,
            value: None,
            enabled: true,
            focused: false,
            parent_context: None,
            sibling_texts: vec![],
            semantic_type: "button".into(),
            confidence: 0.9,
            action_context: None,
        }
    }

    #[test]
    fn classify_web_click_detects_button() {
        let click = classify_web_click(
            "https://x.test", "X", "button", "#submit", "Submit", None, None, None, vec![],
        );
        assert!(click.is_button);
        assert!(click.appears_clickable);
    }

    #[test]
    fn classify_web_click_detects_link() {
        let click = classify_web_click(
            "https://x.test",
            "X",
            "a",
            "a.nav",
            "Home",
            Some("https://x.test/home".into()),
            None,
            None,
            vec![],
        );
        assert!(click.is_link);
        assert!(!click.is_button);
    }

    #[test]
    fn enrich_native_click_fills_in_action_context() {
        let inspector = FakeInspector(Some(sample_native()));
        let result =
            enrich_native_click(&inspector, Point { x: 0.0, y: 0.0 }, Duration::from_millis(200))
                .unwrap();
        assert_eq!(result.action_context, Some(crate::model::ActionContext::Send));
    }

    #[test]
    fn enrich_native_click_returns_none_when_inspector_declines() {
        let inspector = FakeInspector(None);
        let result =
            enrich_native_click(&inspector, Point { x: 0.0, y: 0.0 }, Duration::from_millis(200));
        assert!(result.is_none());
    }

    #[test]
    fn assemble_click_target_prefers_web_over_native() {
        let ctx = EventContext {
            active_app: "Safari".into(),
            active_window: "tab".into(),
            active_url: Some("https://x.test".into()),
        };
        let web = classify_web_click(
            "https://x.test", "X", "a", "a", "Home", None, None, None, vec![],
        );
        let target = assemble_click_target(
            Point { x: 1.0, y: 1.0 },
            &ctx,
            Some(sample_native()),
            Some(web),
        )
        .unwrap();
        assert!(matches!(target.path, ClickPath::Web(_)));
    }

    #[test]
    fn classify_semantic_type_orders_email_before_generic_button() {
        let mut click = sample_native();
        click.role = "button".into();
        click.label = Some("Email support".into());
        let (tag, confidence) = classify_semantic_type(&click);
        assert_eq!(tag, "email_button");
        assert!(confidence > 0.0);
    }

    #[test]
    fn classify_semantic_type_falls_back_to_generic_button() {
        let mut click = sample_native();
        click.role = "button".into();
        click.label = Some("Toggle sidebar".into());
        let (tag, _) = classify_semantic_type(&click);
        assert_eq!(tag, "generic_button");
    }

    #[test]
    fn classify_semantic_type_degrades_unknown_role_to_low_confidence() {
        let mut click = sample_native();
        click.role = "unknown".into();
        click.label = None;
        let (tag, confidence) = classify_semantic_type(&click);
        assert_eq!(tag, "unknown");
        assert_eq!(confidence, 0.1);
    }

    #[test]
    fn classify_semantic_type_detects_navigation_link() {
        let mut click = sample_native();
        click.role = "link".into();
        click.label = Some("Go back to inbox".into());
        let (tag, _) = classify_semantic_type(&click);
        assert_eq!(tag, "navigation_link");
    }

    #[test]
    fn categorize_app_maps_known_names() {
        assert_eq!(categorize_app("Visual Studio Code"), AppCategory::Development);
        assert_eq!(categorize_app("Unknown App"), AppCategory::Other);
    }
}
