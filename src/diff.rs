// Structural diff between two renderings of the same template.
//
// Statics are the anchor: when they match, only changed dynamics travel.
// When they do not match the template itself changed shape, and the only
// safe answer is a fresh baseline.

use lv_protocol::{Dynamic, Patch, PatchValue, RenderTree};

/// Compare two renderings.
///
/// Returns `None` when the static spans differ (structural change; the
/// caller must send `next` in full as a new baseline).  Otherwise returns
/// the sparse patch, which is empty when the renderings are byte-identical.
pub fn diff(prev: &RenderTree, next: &RenderTree) -> Option<Patch> {
    if prev.statics() != next.statics() {
        return None;
    }
    Some(diff_dynamics(prev.dynamics(), next.dynamics()))
}

fn diff_dynamics(prev: &[Dynamic], next: &[Dynamic]) -> Patch {
    let mut patch = Patch::new();
    // Equal statics imply equal dynamic counts, so zip loses nothing.
    for (index, (old, new)) in prev.iter().zip(next).enumerate() {
        match (old, new) {
            (Dynamic::Text(old), Dynamic::Text(new)) => {
                if old != new {
                    patch.insert(index, PatchValue::Text(new.clone()));
                }
            }
            (Dynamic::Tree(old), Dynamic::Tree(new)) => {
                if old.statics() == new.statics() {
                    let nested = diff_dynamics(old.dynamics(), new.dynamics());
                    if !nested.is_empty() {
                        patch.insert(index, PatchValue::Nested(nested));
                    }
                } else {
                    patch.insert(index, PatchValue::Replace(new.clone()));
                }
            }
            // Type change between string and subtree: full replacement.
            (Dynamic::Tree(_), Dynamic::Text(new)) => {
                patch.insert(index, PatchValue::Text(new.clone()));
            }
            (Dynamic::Text(_), Dynamic::Tree(new)) => {
                patch.insert(index, PatchValue::Replace(new.clone()));
            }
        }
    }
    patch
}
