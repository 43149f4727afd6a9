pub mod error;
pub mod form_filler;
pub mod http;
pub mod ignore;
pub mod navigator;
pub mod page;
pub mod request;

pub use error::{Result, ScanError};
pub use form_filler::{FormFiller, FormParams, FormValues};
pub use http::HttpNavigator;
pub use navigator::{Action, Exchange, Navigator, perform};
pub use page::{
    Anchor, FieldTag, FieldType, Form, FormField, LinkKind, LinkRef, Page, PageKind, Redirect,
};
pub use request::{Method, Request};
