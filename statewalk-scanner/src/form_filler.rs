use crate::page::{FieldTag, FieldType, Form, FormField};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const WORD_LEN: usize = 8;

/// One set of values to submit a form with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormParams {
    pub values: BTreeMap<String, Vec<String>>,
    pub submitter: Option<FormField>,
}

impl FormParams {
    pub fn push(&mut self, name: &str, value: &str) {
        self.values
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn with_submitter(mut self, submitter: Option<FormField>) -> Self {
        self.submitter = submitter;
        self
    }

    /// Flattened name/value pairs in submission order, submitter last.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .values
            .iter()
            .filter(|(k, _)| !k.is_empty())
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.clone(), v.clone())))
            .collect();
        if let Some(s) = &self.submitter
            && !s.name.is_empty()
        {
            out.push((s.name.clone(), s.value.clone()));
        }
        out
    }
}

/// Supplier of form values consumed by the exploration engine.
pub trait FormValues {
    /// Every candidate parameter set for `form`. Empty when the form has no
    /// submit control.
    fn candidates(&mut self, form: &Form) -> Vec<FormParams>;

    /// The next parameter set to try, cycling through the candidates in a
    /// shuffled order.
    fn next_params(&mut self, form: &Form) -> Option<FormParams>;
}

#[derive(Debug, Default)]
struct ValuesList {
    values: Vec<FormParams>,
    order: Vec<usize>,
    cursor: usize,
}

impl ValuesList {
    fn next(&mut self, rng: &mut StdRng) -> Option<FormParams> {
        if self.values.is_empty() {
            return None;
        }
        if self.cursor >= self.order.len() {
            self.order = (0..self.values.len()).collect();
            self.order.shuffle(rng);
            self.cursor = 0;
        }
        let params = self.values[self.order[self.cursor]].clone();
        self.cursor += 1;
        Some(params)
    }
}

type FormKey = (Vec<String>, Vec<String>);

/// Seeded form filler. The same seed always yields the same values.
pub struct FormFiller {
    rng: StdRng,
    forms: BTreeMap<FormKey, ValuesList>,
    named: BTreeMap<String, Vec<String>>,
}

impl FormFiller {
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            forms: BTreeMap::new(),
            named: BTreeMap::new(),
        }
    }

    /// Values used for text inputs and textareas called `name` instead of
    /// random words.
    pub fn with_named_param(mut self, name: &str, values: &[&str]) -> Self {
        self.add_named_param(name, values);
        self
    }

    pub fn add_named_param(&mut self, name: &str, values: &[&str]) {
        self.named
            .entry(name.to_string())
            .or_default()
            .extend(values.iter().map(|v| v.to_string()));
    }

    fn key(form: &Form) -> FormKey {
        let mut fields: Vec<String> = form
            .fillable()
            .filter(|f| !f.name.is_empty())
            .map(|f| f.name.clone())
            .collect();
        fields.sort();
        let mut submitters: Vec<String> = form.submitters.iter().map(|s| s.name.clone()).collect();
        submitters.sort();
        (fields, submitters)
    }

    fn generate(&mut self, form: &Form) -> Vec<FormParams> {
        let mut out = Vec::new();
        for s in &form.submitters {
            out.push(Some(self.empty_fill(form, Some(s.clone()))));
        }
        for s in &form.submitters {
            out.push(self.random_fill(form, false, Some(s.clone())));
        }
        for s in &form.submitters {
            out.push(self.random_fill(form, true, Some(s.clone())));
        }
        out.into_iter().flatten().collect()
    }

    fn empty_fill(&self, form: &Form, submitter: Option<FormField>) -> FormParams {
        debug!("Empty filling form {}", form.action);
        let mut params = FormParams::default();
        for f in form.fillable() {
            if f.field_type == FieldType::Hidden {
                params.push(&f.name, &f.value);
            } else {
                params.push(&f.name, "");
            }
        }
        params.with_submitter(submitter)
    }

    /// With `same_password` every password field gets the same value; when
    /// the form has fewer than two password fields there is nothing to vary
    /// and `None` is returned.
    fn random_fill(
        &mut self,
        form: &Form,
        same_password: bool,
        submitter: Option<FormField>,
    ) -> Option<FormParams> {
        debug!(
            "Random filling form {} (same_password={})",
            form.action, same_password
        );
        let mut params = FormParams::default();
        let mut password: Option<String> = None;
        let mut multiple_passwords = false;

        for f in form.fillable() {
            let values: Vec<String> = match (f.tag, f.field_type) {
                (FieldTag::Input, FieldType::Checkbox) => {
                    let choices = [f.value.clone(), String::new()];
                    vec![choices.choose(&mut self.rng).cloned().unwrap_or_default()]
                }
                (FieldTag::Input, FieldType::Hidden) => vec![f.value.clone()],
                (FieldTag::Input, FieldType::Text) => match self.named.get(&f.name) {
                    Some(named) => named.clone(),
                    None => vec![words(&mut self.rng, 2)],
                },
                (FieldTag::Input, FieldType::Password) => {
                    let value = match password.clone() {
                        Some(p) if same_password => {
                            multiple_passwords = true;
                            p
                        }
                        _ => {
                            let p = generate_password(&mut self.rng);
                            password = Some(p.clone());
                            p
                        }
                    };
                    vec![value]
                }
                (FieldTag::Textarea, _) => match self.named.get(&f.name) {
                    Some(named) => named.clone(),
                    None => vec![words(&mut self.rng, 10)],
                },
                _ => vec![String::new()],
            };
            for v in values {
                params.push(&f.name, &v);
            }
        }

        if same_password && !multiple_passwords {
            return None;
        }
        Some(params.with_submitter(submitter))
    }
}

impl Default for FormFiller {
    fn default() -> Self {
        Self::new()
    }
}

impl FormValues for FormFiller {
    fn candidates(&mut self, form: &Form) -> Vec<FormParams> {
        let key = Self::key(form);
        if !self.forms.contains_key(&key) {
            let values = self.generate(form);
            debug!(
                "Generated {} parameter sets for form {}",
                values.len(),
                form.action
            );
            self.forms.insert(
                key.clone(),
                ValuesList {
                    values,
                    ..Default::default()
                },
            );
        }
        self.forms
            .get(&key)
            .map(|l| l.values.clone())
            .unwrap_or_default()
    }

    fn next_params(&mut self, form: &Form) -> Option<FormParams> {
        self.candidates(form);
        let key = Self::key(form);
        let list = self.forms.get_mut(&key)?;
        list.next(&mut self.rng)
    }
}

fn word(rng: &mut StdRng) -> String {
    (0..WORD_LEN)
        .filter_map(|_| {
            let letters = if rng.gen_bool(0.5) {
                LOWERCASE
            } else {
                UPPERCASE
            };
            letters.choose(rng).map(|b| *b as char)
        })
        .collect()
}

fn words(rng: &mut StdRng, count: usize) -> String {
    (0..count).map(|_| word(rng)).collect::<Vec<_>>().join(" ")
}

/// Eight characters with at least one lowercase letter, one uppercase letter
/// and one digit.
fn generate_password(rng: &mut StdRng) -> String {
    let mut chars: Vec<u8> = Vec::with_capacity(WORD_LEN);
    for set in [LOWERCASE, UPPERCASE, DIGITS] {
        if let Some(c) = set.choose(rng) {
            chars.push(*c);
        }
    }
    while chars.len() < WORD_LEN {
        let set = if rng.gen_bool(0.5) {
            LOWERCASE
        } else {
            UPPERCASE
        };
        if let Some(c) = set.choose(rng) {
            chars.push(*c);
        }
    }
    chars.shuffle(rng);
    chars.into_iter().map(char::from).collect()
}
