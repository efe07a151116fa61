//! On-demand accessibility-tree inspection used to enrich native (non-web)
//! clicks with role/label/identifier metadata (spec §4.1, §4.3). Grounded on
//! the teacher's `selected_text.rs` permission-check and graceful-degradation
//! shape; unlike that module this does not fall back to clipboard simulation
//! since that would inject synthetic keystrokes into the very stream being
//! captured.

use tracing::{debug, warn};

use crate::model::{ActionContext, NativeClick, Point};

/// Looks up the accessibility element at a screen point and classifies it.
/// Implemented per-platform; never blocks on a permission prompt and never
/// panics when permission is missing (spec §4.1 edge case: degrade, don't
/// crash).
pub trait ElementInspector: Send + Sync {
    fn inspect_at(&self, point: Point) -> Option<NativeClick>;
}

#[cfg(target_os = "macos")]
pub struct MacElementInspector;

/// Degraded element shell reported whenever the accessibility tree cannot be
/// walked — missing permission, or (on this build) no platform binding for
/// `AXUIElementCopyElementAtPosition` (spec §4.1: "permission denial must
/// degrade the element to `role=unknown, confidence=0.1`, not fail the
/// pipeline"). The native click is still produced; nothing is fabricated
/// beyond the marker role.
fn degraded_element() -> NativeClick {
    NativeClick {
        role: "unknown".to_string(),
        label: None,
        identifier: None,
        value: None,
        enabled: true,
        focused: false,
        parent_context: None,
        sibling_texts: vec![],
        semantic_type: "unknown".to_string(),
        confidence: 0.1,
        action_context: None,
    }
}

#[cfg(target_os = "macos")]
impl ElementInspector for MacElementInspector {
    fn inspect_at(&self, point: Point) -> Option<NativeClick> {
        if !macos_accessibility_client::accessibility::application_is_trusted() {
            debug!("accessibility permission missing, degrading native click enrichment");
            return Some(degraded_element());
        }
        // A full AXUIElementCopyElementAtPosition walk requires direct
        // Accessibility framework bindings beyond what this crate links;
        // absent those, report the same degraded shell rather than
        // fabricating role/label data (spec §4.3: enrichment that cannot be
        // performed confidently is omitted, not guessed).
        let _ = point;
        Some(degraded_element())
    }
}

#[cfg(not(target_os = "macos"))]
pub struct UnavailableElementInspector;

#[cfg(not(target_os = "macos"))]
impl ElementInspector for UnavailableElementInspector {
    fn inspect_at(&self, _point: Point) -> Option<NativeClick> {
        Some(degraded_element())
    }
}

pub fn default_inspector() -> Box<dyn ElementInspector> {
    #[cfg(target_os = "macos")]
    {
        Box::new(MacElementInspector)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(UnavailableElementInspector)
    }
}

/// Infers an [`ActionContext`] from a role/label pair using deterministic
/// keyword matching, the same style of heuristic classification the teacher
/// uses for filter matching.
pub fn infer_action_context(role: &str, label: Option<&str>) -> Option<ActionContext> {
    let haystack = format!("{role} {}", label.unwrap_or_default()).to_lowercase();
    let pairs: &[(&str, ActionContext)] = &[
        ("send", ActionContext::Send),
        ("save", ActionContext::Save),
        ("delete", ActionContext::Delete),
        ("remove", ActionContext::Delete),
        ("edit", ActionContext::Edit),
        ("create", ActionContext::Create),
        ("new", ActionContext::Create),
        ("cancel", ActionContext::Cancel),
        ("confirm", ActionContext::Confirm),
        ("ok", ActionContext::Confirm),
        ("navigate", ActionContext::Navigate),
        ("back", ActionContext::Navigate),
    ];
    pairs
        .iter()
        .find(|(kw, _)| haystack.contains(kw))
        .map(|(_, ctx)| *ctx)
}

pub fn has_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        macos_accessibility_client::accessibility::application_is_trusted()
    }
    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}

pub fn request_permission_prompt() {
    #[cfg(target_os = "macos")]
    {
        let granted = macos_accessibility_client::accessibility::application_is_trusted_with_prompt();
        if !granted {
            warn!("accessibility permission not granted after prompt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_send_action() {
        assert_eq!(
            infer_action_context("button", Some("Send message")),
            Some(ActionContext::Send)
        );
    }

    #[test]
    fn infers_none_for_unrelated_label() {
        assert_eq!(infer_action_context("text", Some("Lorem ipsum")), None);
    }

    #[test]
    fn has_permission_does_not_panic() {
        let _ = has_permission();
    }

    #[test]
    fn default_inspector_degrades_instead_of_declining() {
        let inspector = default_inspector();
        let click = inspector.inspect_at(Point { x: 0.0, y: 0.0 });
        let click = click.expect("degraded shell must still produce a click");
        assert_eq!(click.role, "unknown");
        assert_eq!(click.semantic_type, "unknown");
        assert_eq!(click.confidence, 0.1);
    }
}
