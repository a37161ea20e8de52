//! Frame pages: small HTML documents whose meta tags describe a preview
//! image and a single button posting back to `/api/frame`.

use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use strum::{AsRefStr, EnumString};

use lilyframe_core::render::escape_xml;

const FRAME_TEMPLATE: &str = r#"<!DOCTYPE html><html><head>
<title>{{ title|attr }}</title>
<meta property="fc:frame" content="vNext" />
<meta property="og:image" content="{{ image|attr }}" />
<meta property="fc:frame:image" content="{{ image|attr }}" />
<meta property="fc:frame:button:1" content="{{ button|attr }}" />
{%- if input %}
<meta property="fc:frame:input:text" content="{{ input|attr }}" />
{%- endif %}
<meta property="fc:frame:post_url" content="{{ post_url|attr }}" />
</head></html>
"#;

/// The `action` query parameter of the frame endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FrameAction {
    #[default]
    Input,
    Submit,
    Check,
}

/// Every page the frame endpoint can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePage<'a> {
    /// Ask for a prompt.
    Input,
    /// Prompt accepted, generation started.
    Submitted { id: &'a str },
    /// Still generating.
    Processing { id: &'a str },
    Completed { id: &'a str },
    Failed,
    /// Anything the endpoint could not make sense of.
    Fallback,
}

#[derive(Debug, Serialize)]
struct FrameView {
    title: &'static str,
    image: String,
    button: &'static str,
    input: Option<&'static str>,
    post_url: String,
}

#[derive(Debug)]
pub struct FramePages {
    env: Environment<'static>,
    base_url: String,
}

impl FramePages {
    pub fn new(base_url: &str) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        // Values are escaped explicitly with `attr`, which keeps URLs readable.
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("attr", |value: String| escape_xml(&value));
        env.add_template("frame.html", FRAME_TEMPLATE)?;

        Ok(Self {
            env,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn render(&self, page: FramePage<'_>) -> Result<String, minijinja::Error> {
        let view = self.view(page);
        self.env.get_template("frame.html")?.render(&view)
    }

    fn asset(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url)
    }

    fn post_url(&self, action: FrameAction, id: Option<&str>) -> String {
        let mut url = format!("{}/api/frame?action={}", self.base_url, action.as_ref());
        if let Some(id) = id {
            url.push_str("&id=");
            url.push_str(id);
        }
        url
    }

    fn view(&self, page: FramePage<'_>) -> FrameView {
        match page {
            FramePage::Input => FrameView {
                title: "Input Prompt",
                image: self.asset("enter-prompt.png"),
                button: "Submit",
                input: Some("Enter your prompt"),
                post_url: self.post_url(FrameAction::Submit, None),
            },
            FramePage::Submitted { id } => FrameView {
                title: "Request Submitted",
                image: self.asset("loading.gif"),
                button: "Check Status",
                input: None,
                post_url: self.post_url(FrameAction::Check, Some(id)),
            },
            FramePage::Processing { id } => FrameView {
                title: "Processing",
                image: self.asset("loading.gif"),
                button: "Check Again",
                input: None,
                post_url: self.post_url(FrameAction::Check, Some(id)),
            },
            FramePage::Completed { id } => FrameView {
                title: "Result",
                image: self.asset(&format!("results/{id}.png")),
                button: "New Request",
                input: None,
                post_url: self.post_url(FrameAction::Input, None),
            },
            FramePage::Failed => FrameView {
                title: "Error",
                image: self.asset("error.png"),
                button: "Try Again",
                input: None,
                post_url: self.post_url(FrameAction::Input, None),
            },
            FramePage::Fallback => FrameView {
                title: "Error",
                image: self.asset("error.png"),
                button: "Start Over",
                input: None,
                post_url: self.post_url(FrameAction::Input, None),
            },
        }
    }
}
