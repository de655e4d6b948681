#![allow(dead_code)]

use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use teams_chat_export::listing::chat_url;
use teams_chat_export::model::Conversation;
use teams_chat_export::{Decider, FetchError, Page, PageFetcher};
use url::Url;

pub const BASE: &str = "https://graph.test/v1.0/chats";

pub fn base() -> Url {
    Url::parse(BASE).unwrap()
}

pub fn messages_url(chat_id: &str) -> String {
    chat_url(&base(), chat_id, "messages")
}

pub fn next_url(chat_id: &str, page: u32) -> String {
    format!("https://graph.test/v1.0/chats/{chat_id}/messages?$skiptoken=page{page}")
}

/// A plain message record as the messages endpoint returns it.
pub fn message(i: u32, date: &str) -> Value {
    json!({
        "id": i.to_string(),
        "messageType": "message",
        "createdDateTime": format!("{date}T10:00:00.000Z"),
        "from": { "user": { "displayName": format!("user{i}") } },
        "body": { "contentType": "html", "content": format!("message {i}") },
        "attachments": [],
    })
}

pub fn conversation(id: &str, name: &str) -> Conversation {
    Conversation {
        id: id.into(),
        name: name.into(),
        full_name: None,
        created: "2024-01-01T00:00:00Z".into(),
        updated: "2024-06-01T00:00:00Z".into(),
        chat_type: "group".into(),
    }
}

enum Reply {
    Page(Page),
    Fail(Box<dyn Fn() -> FetchError>),
}

/// In-memory chat service keyed by URL. Every fetch is logged.
#[derive(Default)]
pub struct FakeFetcher {
    routes: HashMap<String, Reply>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, records: Vec<Value>, next: Option<String>) -> Self {
        self.routes.insert(
            url.into(),
            Reply::Page(Page {
                records,
                next_url: next,
            }),
        );
        self
    }

    pub fn fail(mut self, url: impl Into<String>, err: impl Fn() -> FetchError + 'static) -> Self {
        self.routes.insert(url.into(), Reply::Fail(Box::new(err)));
        self
    }

    /// `pages[i]` is served at page `i + 1`; every page but the last links to the next.
    pub fn chat(mut self, chat_id: &str, pages: Vec<Vec<Value>>) -> Self {
        let count = pages.len() as u32;
        for (i, records) in pages.into_iter().enumerate() {
            let n = i as u32 + 1;
            let url = if n == 1 {
                messages_url(chat_id)
            } else {
                next_url(chat_id, n)
            };
            let next = (n < count).then(|| next_url(chat_id, n + 1));
            self = self.page(url, records, next);
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl PageFetcher for FakeFetcher {
    fn fetch(&self, url: &str, _params: &[(&str, &str)]) -> Result<Page, FetchError> {
        self.calls.borrow_mut().push(url.to_string());
        match self.routes.get(url) {
            Some(Reply::Page(page)) => Ok(page.clone()),
            Some(Reply::Fail(err)) => Err(err()),
            None => panic!("unexpected request to {url}"),
        }
    }
}

/// Answers questions from a script; panics when asked more than scripted.
#[derive(Default)]
pub struct ScriptedDecider {
    answers: VecDeque<bool>,
    choice: Option<usize>,
    pub questions: Vec<String>,
}

impl ScriptedDecider {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn choosing(mut self, index: usize) -> Self {
        self.choice = Some(index);
        self
    }
}

impl Decider for ScriptedDecider {
    fn confirm(&mut self, question: &str, _default: bool) -> bool {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted question: {question}"))
    }

    fn choose(&mut self, prompt: &str, _options: &[String]) -> Option<usize> {
        self.questions.push(prompt.to_string());
        self.choice
    }
}

/// Entry headers (`##### sender - time`) of an archive, top to bottom.
pub fn entries(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| l.starts_with("##### "))
        .map(str::to_string)
        .collect()
}
