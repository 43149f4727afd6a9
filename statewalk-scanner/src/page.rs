use crate::form_filler::FormParams;
use crate::navigator::Action;
use crate::request::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkKind {
    Anchor,
    Form,
    Redirect,
}

/// Position of a concrete link inside one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkRef {
    pub kind: LinkKind,
    pub index: usize,
}

impl LinkRef {
    pub fn anchor(index: usize) -> Self {
        Self {
            kind: LinkKind::Anchor,
            index,
        }
    }

    pub fn form(index: usize) -> Self {
        Self {
            kind: LinkKind::Form,
            index,
        }
    }

    pub fn redirect(index: usize) -> Self {
        Self {
            kind: LinkKind::Redirect,
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Absolute URL, fragment removed.
    pub href: String,
    /// Tag path from the document root, positional indices removed.
    pub dompath: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldTag {
    Input,
    Textarea,
    Button,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Password,
    Hidden,
    Checkbox,
    Submit,
    Image,
    Button,
    File,
    Other,
}

impl FieldType {
    pub fn from_attr(attr: &str) -> Self {
        match attr.trim().to_ascii_lowercase().as_str() {
            // missing type attribute defaults to a text input
            "" | "text" => FieldType::Text,
            "password" => FieldType::Password,
            "hidden" => FieldType::Hidden,
            "checkbox" => FieldType::Checkbox,
            "submit" => FieldType::Submit,
            "image" => FieldType::Image,
            "button" => FieldType::Button,
            "file" => FieldType::File,
            _ => FieldType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormField {
    pub tag: FieldTag,
    pub field_type: FieldType,
    pub name: String,
    pub value: String,
}

impl FormField {
    pub fn new(tag: FieldTag, field_type: FieldType, name: &str, value: &str) -> Self {
        Self {
            tag,
            field_type,
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub method: Method,
    /// Absolute action URL with ignored parts removed.
    pub action: String,
    pub dompath: String,
    /// Visible inputs (everything but hidden, button and submit).
    pub inputs: Vec<FormField>,
    pub hiddens: Vec<FormField>,
    pub textareas: Vec<FormField>,
    pub submitters: Vec<FormField>,
}

impl Form {
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|f| f.name.clone()).collect()
    }

    pub fn hidden_names(&self) -> Vec<String> {
        self.hiddens.iter().map(|f| f.name.clone()).collect()
    }

    /// Fields a form filler has to provide values for.
    pub fn fillable(&self) -> impl Iterator<Item = &FormField> {
        self.inputs
            .iter()
            .chain(self.hiddens.iter())
            .chain(self.textareas.iter())
    }

    pub fn is_submittable(&self) -> bool {
        !self.submitters.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    Html,
    Redirect,
    Error,
}

/// A normalized response: only the outgoing links matter to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub kind: PageKind,
    pub anchors: Vec<Anchor>,
    pub forms: Vec<Form>,
    pub redirects: Vec<Redirect>,
}

impl Page {
    pub fn html(url: &str, status: u16) -> Self {
        Self {
            url: url.to_string(),
            status,
            kind: PageKind::Html,
            anchors: Vec::new(),
            forms: Vec::new(),
            redirects: Vec::new(),
        }
    }

    /// Synthetic page used for failed navigations. Error pages expose no links.
    pub fn error(url: &str, status: u16) -> Self {
        Self {
            kind: PageKind::Error,
            ..Self::html(url, status)
        }
    }

    pub fn redirect(url: &str, status: u16, location: &str) -> Self {
        Self {
            kind: PageKind::Redirect,
            redirects: vec![Redirect {
                location: location.to_string(),
            }],
            ..Self::html(url, status)
        }
    }

    pub fn with_anchor(mut self, href: &str, dompath: &str) -> Self {
        self.anchors.push(Anchor {
            href: href.to_string(),
            dompath: dompath.to_string(),
        });
        self
    }

    pub fn with_form(mut self, form: Form) -> Self {
        self.forms.push(form);
        self
    }

    pub fn link_refs(&self) -> Vec<LinkRef> {
        let anchors = (0..self.anchors.len()).map(LinkRef::anchor);
        let forms = (0..self.forms.len()).map(LinkRef::form);
        let redirects = (0..self.redirects.len()).map(LinkRef::redirect);
        anchors.chain(forms).chain(redirects).collect()
    }

    pub fn has_links(&self) -> bool {
        !(self.anchors.is_empty() && self.forms.is_empty() && self.redirects.is_empty())
    }

    pub fn form(&self, link: LinkRef) -> Option<&Form> {
        match link.kind {
            LinkKind::Form => self.forms.get(link.index),
            _ => None,
        }
    }

    /// The navigation that following `link` would perform. Forms need
    /// parameters; without them `None` is returned.
    pub fn action<'a>(
        &'a self,
        link: LinkRef,
        params: Option<&'a FormParams>,
    ) -> Option<Action<'a>> {
        match link.kind {
            LinkKind::Anchor => self.anchors.get(link.index).map(Action::Click),
            LinkKind::Redirect => self.redirects.get(link.index).map(Action::Follow),
            LinkKind::Form => {
                let form = self.forms.get(link.index)?;
                params.map(|p| Action::Submit(form, p))
            }
        }
    }
}
