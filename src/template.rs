// Template rendering against the static/dynamic fragmentation contract.
//
// The default renderer tokenizes template source on `{{ ... }}` boundaries:
// text between expressions becomes the static spans, and each expression is
// registered as its own one-expression minijinja template, evaluated per
// render against the serialized assigns.  The statics therefore depend only
// on the template source, which is what the differ relies on.

use lv_protocol::{Dynamic, RenderTree};
use minijinja::{AutoEscape, Environment};
use serde::Serialize;

use crate::error::LiveError;

/// Anything that can turn assigns into a render tree.
///
/// The default implementation is [`Template`]; custom renderers can emit
/// `Dynamic::Tree` entries to nest sub-view renderings.
pub trait Renderer<S>: Send + Sync {
    fn render(&self, assigns: &S) -> Result<RenderTree, LiveError>;
}

/// Adapter turning a plain `fn(&S) -> RenderTree` into a [`Renderer`].
pub struct FnRenderer<F>(F);

impl<F> FnRenderer<F> {
    pub fn new(render: F) -> Self {
        Self(render)
    }
}

impl<S, F> Renderer<S> for FnRenderer<F>
where
    F: Fn(&S) -> Result<RenderTree, LiveError> + Send + Sync,
{
    fn render(&self, assigns: &S) -> Result<RenderTree, LiveError> {
        (self.0)(assigns)
    }
}

/// A parsed `{{ ... }}` template.
///
/// Expression output is HTML-escaped by the engine; filters such as `safe`
/// and `round` are available inside expressions.
pub struct Template {
    statics: Vec<String>,
    env: Environment<'static>,
    expr_count: usize,
}

fn expr_template_name(index: usize) -> String {
    format!("expr-{index}")
}

impl Template {
    /// Tokenize and compile `source`.
    ///
    /// An unterminated `{{` or a stray `}}` is a parse error; so is an
    /// expression minijinja refuses to compile.
    pub fn parse(source: &str) -> Result<Self, LiveError> {
        let (statics, exprs) = tokenize(source)?;

        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        for (index, expr) in exprs.iter().enumerate() {
            env.add_template_owned(expr_template_name(index), format!("{{{{ {expr} }}}}"))?;
        }

        Ok(Self {
            statics,
            env,
            expr_count: exprs.len(),
        })
    }

    /// Number of dynamic holes in the template.
    pub fn dynamic_count(&self) -> usize {
        self.expr_count
    }

    fn render_context(&self, ctx: &minijinja::Value) -> Result<RenderTree, LiveError> {
        let mut dynamics = Vec::with_capacity(self.expr_count);
        for index in 0..self.expr_count {
            let template = self.env.get_template(&expr_template_name(index))?;
            dynamics.push(Dynamic::Text(template.render(ctx)?));
        }
        Ok(RenderTree::new(self.statics.clone(), dynamics)?)
    }
}

impl<S: Serialize> Renderer<S> for Template {
    fn render(&self, assigns: &S) -> Result<RenderTree, LiveError> {
        self.render_context(&minijinja::Value::from_serializable(assigns))
    }
}

/// Split `source` into statics and expression sources.
///
/// Returns `statics.len() == exprs.len() + 1` by construction; the empty
/// template yields `([""], [])`.
fn tokenize(source: &str) -> Result<(Vec<String>, Vec<String>), LiveError> {
    let mut statics = Vec::new();
    let mut exprs = Vec::new();
    let mut rest = source;

    loop {
        match rest.find("{{") {
            None => {
                if rest.contains("}}") {
                    return Err(LiveError::TemplateParse(
                        "stray `}}` outside an expression".to_owned(),
                    ));
                }
                statics.push(rest.to_owned());
                break;
            }
            Some(start) => {
                let fixed = &rest[..start];
                if fixed.contains("}}") {
                    return Err(LiveError::TemplateParse(
                        "stray `}}` outside an expression".to_owned(),
                    ));
                }
                statics.push(fixed.to_owned());
                let after = &rest[start + 2..];
                let Some(end) = after.find("}}") else {
                    return Err(LiveError::TemplateParse(
                        "unterminated `{{` expression".to_owned(),
                    ));
                };
                exprs.push(after[..end].trim().to_owned());
                rest = &after[end + 2..];
            }
        }
    }

    Ok((statics, exprs))
}
