use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Tabs, Wrap};
use ratatui::Terminal;

use crate::api::{Answer, CommentEntry, Company, JobPosting, NewQuestion, Position, Question};
use crate::data::{DiscussionService, PageSource};
use crate::directory::Directory;
use crate::feed::{Feed, FetchTicket, LoadState, Page, QueryKey, ScrollMetrics};

const TICK: Duration = Duration::from_millis(100);

const EMPLOYMENT_TYPES: &[&str] = &[
    "신입",
    "경력 1~3년",
    "경력 3~5년",
    "경력 5~10년",
    "경력 10년 이상",
];

const WORK_LOCATIONS: &[&str] = &[
    "서울", "경기", "인천", "부산", "대구", "광주", "대전", "울산", "세종",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Questions,
    Companies,
    JobPostings,
}

impl Tab {
    fn title(self) -> &'static str {
        match self {
            Tab::Questions => "Questions",
            Tab::Companies => "Companies",
            Tab::JobPostings => "Job postings",
        }
    }
}

enum Msg {
    Questions(FetchTicket, Result<Page<Question>, String>),
    Companies(FetchTicket, Result<Page<Company>, String>),
    JobPostings(FetchTicket, Result<Page<JobPosting>, String>),
    DirectoryLoaded(Result<usize, String>),
    Answers(i64, Result<Vec<Answer>, String>),
    Comments(i64, i64, Result<Vec<CommentEntry>, String>),
    AnswerSubmitted(i64, Result<(), String>),
    CommentSubmitted(i64, i64, Result<(), String>),
    Positions(Result<Vec<Position>, String>),
    QuestionCreated(Result<(), String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Search,
    Compose,
}

struct QuestionDetail {
    question: Question,
    answers: Vec<Answer>,
    comments: HashMap<i64, Vec<CommentEntry>>,
    selected: usize,
    loading: bool,
    status: String,
}

struct JobDetail {
    posting: JobPosting,
    scroll: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DraftStep {
    Company,
    Text,
    Category,
}

/// A new question being composed: pick the company, write the text, pick a
/// category from the position list, submit.
struct QuestionDraft {
    step: DraftStep,
    filter: String,
    selected: usize,
    company: Option<Company>,
    text: String,
    positions: Vec<Position>,
    category_selected: usize,
    status: String,
}

pub struct Options {
    pub question_source: Arc<dyn PageSource<Question>>,
    pub company_source: Arc<dyn PageSource<Company>>,
    pub job_posting_source: Arc<dyn PageSource<JobPosting>>,
    pub discussions: Arc<dyn DiscussionService>,
    pub directory: Arc<Directory>,
    pub page_size: u32,
    pub status_message: String,
}

pub struct Model {
    question_source: Arc<dyn PageSource<Question>>,
    company_source: Arc<dyn PageSource<Company>>,
    job_posting_source: Arc<dyn PageSource<JobPosting>>,
    discussions: Arc<dyn DiscussionService>,
    directory: Arc<Directory>,

    questions: Feed<Question>,
    companies: Feed<Company>,
    job_postings: Feed<JobPosting>,
    companies_started: bool,
    jobs_started: bool,

    tab: Tab,
    selected: HashMap<&'static str, usize>,
    offset: HashMap<&'static str, usize>,
    list_height: usize,

    input_mode: InputMode,
    input_buffer: String,
    // Set when composing a comment; None means the compose box is an answer.
    compose_comment_on: Option<i64>,
    employment_filter: Option<usize>,
    location_filter: Option<usize>,

    detail: Option<QuestionDetail>,
    job_detail: Option<JobDetail>,
    draft: Option<QuestionDraft>,
    status_message: String,
    should_quit: bool,

    tx: Sender<Msg>,
    rx: Receiver<Msg>,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let (tx, rx) = unbounded();
        Model {
            question_source: options.question_source,
            company_source: options.company_source,
            job_posting_source: options.job_posting_source,
            discussions: options.discussions,
            directory: options.directory,
            questions: Feed::new(options.page_size),
            companies: Feed::new(options.page_size),
            job_postings: Feed::new(options.page_size),
            companies_started: false,
            jobs_started: false,
            tab: Tab::Questions,
            selected: HashMap::new(),
            offset: HashMap::new(),
            list_height: 0,
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            compose_comment_on: None,
            employment_filter: None,
            location_filter: None,
            detail: None,
            job_detail: None,
            draft: None,
            status_message: options.status_message,
            should_quit: false,
            tx,
            rx,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode().context("enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("create terminal")?;

        self.start();
        let result = self.event_loop(&mut terminal);

        disable_raw_mode().ok();
        execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
        terminal.show_cursor().ok();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
        loop {
            while let Ok(msg) = self.rx.try_recv() {
                self.handle_msg(msg);
            }
            terminal.draw(|frame| self.draw(frame))?;
            if event::poll(TICK)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key);
                    }
                }
            }
            if self.should_quit {
                return Ok(());
            }
        }
    }

    fn start(&mut self) {
        let ticket = self.questions.reset(QueryKey::default());
        self.dispatch_questions(ticket);

        let directory = self.directory.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = directory
                .load()
                .map(|companies| companies.len())
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::DirectoryLoaded(result));
        });
    }

    // --- fetch dispatch -------------------------------------------------

    fn dispatch_questions(&self, ticket: FetchTicket) {
        let source = self.question_source.clone();
        let query = self.questions.query().clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = source
                .fetch_page(&query, ticket.request)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::Questions(ticket, result));
        });
    }

    fn dispatch_companies(&self, ticket: FetchTicket) {
        let source = self.company_source.clone();
        let query = self.companies.query().clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = source
                .fetch_page(&query, ticket.request)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::Companies(ticket, result));
        });
    }

    fn dispatch_job_postings(&self, ticket: FetchTicket) {
        let source = self.job_posting_source.clone();
        let query = self.job_postings.query().clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = source
                .fetch_page(&query, ticket.request)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::JobPostings(ticket, result));
        });
    }

    fn open_question_detail(&mut self, question: Question) {
        let question_id = question.question_id;
        self.detail = Some(QuestionDetail {
            question,
            answers: Vec::new(),
            comments: HashMap::new(),
            selected: 0,
            loading: true,
            status: "Loading answers...".into(),
        });
        let discussions = self.discussions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = discussions
                .load_answers(question_id)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::Answers(question_id, result));
        });
    }

    fn load_comments_for_selection(&mut self) {
        let Some(detail) = &self.detail else {
            return;
        };
        let Some(answer) = detail.answers.get(detail.selected) else {
            return;
        };
        if detail.comments.contains_key(&answer.answer_id) {
            return;
        }
        let question_id = detail.question.question_id;
        let answer_id = answer.answer_id;
        let discussions = self.discussions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = discussions
                .load_comments(answer_id)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::Comments(question_id, answer_id, result));
        });
    }

    fn submit_answer(&mut self, text: String) {
        let Some(detail) = &mut self.detail else {
            return;
        };
        let question_id = detail.question.question_id;
        detail.status = "Submitting answer...".into();
        let discussions = self.discussions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = discussions
                .submit_answer(question_id, &text)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::AnswerSubmitted(question_id, result));
        });
    }

    fn start_question_draft(&mut self) {
        self.draft = Some(QuestionDraft {
            step: DraftStep::Company,
            filter: String::new(),
            selected: 0,
            company: None,
            text: String::new(),
            positions: Vec::new(),
            category_selected: 0,
            status: "Pick a company: type to filter, Enter to select, Esc to cancel".into(),
        });
        let discussions = self.discussions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = discussions.positions().map_err(|err| err.to_string());
            let _ = tx.send(Msg::Positions(result));
        });
    }

    fn draft_company_matches(&self) -> Vec<Company> {
        let Some(draft) = &self.draft else {
            return Vec::new();
        };
        let term = draft.filter.trim().to_lowercase();
        self.directory
            .companies()
            .into_iter()
            .filter(|company| term.is_empty() || company.company_name.to_lowercase().contains(&term))
            .collect()
    }

    fn handle_draft_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            self.draft = None;
            return;
        }
        let step = match &self.draft {
            Some(draft) => draft.step,
            None => return,
        };
        match step {
            DraftStep::Company => self.handle_draft_company_key(key),
            DraftStep::Text => self.handle_draft_text_key(key),
            DraftStep::Category => self.handle_draft_category_key(key),
        }
    }

    fn handle_draft_company_key(&mut self, key: KeyEvent) {
        let matches = self.draft_company_matches();
        let Some(draft) = &mut self.draft else {
            return;
        };
        match key.code {
            KeyCode::Enter => {
                if let Some(company) = matches.get(draft.selected) {
                    draft.company = Some(company.clone());
                    draft.step = DraftStep::Text;
                    draft.status = "Write the question, Enter to continue".into();
                }
            }
            KeyCode::Up => draft.selected = draft.selected.saturating_sub(1),
            KeyCode::Down => {
                if draft.selected + 1 < matches.len() {
                    draft.selected += 1;
                }
            }
            KeyCode::Backspace => {
                draft.filter.pop();
                draft.selected = 0;
            }
            KeyCode::Char(ch) => {
                draft.filter.push(ch);
                draft.selected = 0;
            }
            _ => {}
        }
    }

    fn handle_draft_text_key(&mut self, key: KeyEvent) {
        let mut submit = false;
        {
            let Some(draft) = &mut self.draft else {
                return;
            };
            match key.code {
                KeyCode::Enter => {
                    if !draft.text.trim().is_empty() {
                        if draft.positions.is_empty() {
                            // No category list available; submit without one.
                            submit = true;
                        } else {
                            draft.step = DraftStep::Category;
                            draft.status = "Pick a category, Enter to submit".into();
                        }
                    }
                }
                KeyCode::Backspace => {
                    draft.text.pop();
                }
                KeyCode::Char(ch) => draft.text.push(ch),
                _ => {}
            }
        }
        if submit {
            self.submit_question();
        }
    }

    fn handle_draft_category_key(&mut self, key: KeyEvent) {
        let mut submit = false;
        {
            let Some(draft) = &mut self.draft else {
                return;
            };
            match key.code {
                KeyCode::Up | KeyCode::Char('k') => {
                    draft.category_selected = draft.category_selected.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    if draft.category_selected + 1 < draft.positions.len() {
                        draft.category_selected += 1;
                    }
                }
                KeyCode::Enter => submit = true,
                _ => {}
            }
        }
        if submit {
            self.submit_question();
        }
    }

    fn submit_question(&mut self) {
        let Some(draft) = &mut self.draft else {
            return;
        };
        let Some(company) = &draft.company else {
            return;
        };
        let question = NewQuestion {
            question: draft.text.trim().to_string(),
            company_id: company.company_id,
            category: draft
                .positions
                .get(draft.category_selected)
                .map(|position| position.position_name.clone())
                .unwrap_or_default(),
            tag: String::new(),
        };
        draft.status = "Submitting question...".into();
        let discussions = self.discussions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = discussions
                .create_question(&question)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::QuestionCreated(result));
        });
    }

    fn submit_comment(&mut self, answer_id: i64, text: String) {
        let Some(detail) = &mut self.detail else {
            return;
        };
        let question_id = detail.question.question_id;
        detail.status = "Submitting comment...".into();
        let discussions = self.discussions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = discussions
                .submit_comment(answer_id, &text)
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::CommentSubmitted(question_id, answer_id, result));
        });
    }

    // --- message handling ----------------------------------------------

    fn handle_msg(&mut self, msg: Msg) {
        match msg {
            Msg::Questions(ticket, result) => {
                self.questions.complete(ticket, result);
                if self.questions.state() == LoadState::Errored {
                    self.status_message = format!(
                        "Failed to load questions: {}",
                        self.questions.last_error.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Msg::Companies(ticket, result) => {
                self.companies.complete(ticket, result);
                if self.companies.state() == LoadState::Errored {
                    self.status_message = format!(
                        "Failed to load companies: {}",
                        self.companies.last_error.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Msg::JobPostings(ticket, result) => {
                self.job_postings.complete(ticket, result);
                if self.job_postings.state() == LoadState::Errored {
                    self.status_message = format!(
                        "Failed to load job postings: {}",
                        self.job_postings.last_error.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Msg::DirectoryLoaded(result) => match result {
                Ok(count) => {
                    self.status_message = format!("Company directory ready ({count} companies).");
                }
                Err(err) => {
                    self.status_message = format!("Failed to load company directory: {err}");
                }
            },
            Msg::Answers(question_id, result) => {
                let Some(detail) = &mut self.detail else {
                    return;
                };
                // A detail view opened for another question must not adopt
                // answers fetched for this one.
                if detail.question.question_id != question_id {
                    return;
                }
                detail.loading = false;
                match result {
                    Ok(answers) => {
                        detail.status = format!("{} answers", answers.len());
                        detail.answers = answers;
                    }
                    Err(err) => {
                        detail.status = format!("Failed to load answers: {err}");
                    }
                }
            }
            Msg::Comments(question_id, answer_id, result) => {
                let Some(detail) = &mut self.detail else {
                    return;
                };
                if detail.question.question_id != question_id {
                    return;
                }
                match result {
                    Ok(comments) => {
                        detail.comments.insert(answer_id, comments);
                    }
                    Err(err) => {
                        detail.status = format!("Failed to load comments: {err}");
                    }
                }
            }
            Msg::AnswerSubmitted(question_id, result) => {
                let Some(detail) = &mut self.detail else {
                    return;
                };
                if detail.question.question_id != question_id {
                    return;
                }
                match result {
                    Ok(()) => {
                        detail.status = "Answer submitted.".into();
                        detail.loading = true;
                        let discussions = self.discussions.clone();
                        let tx = self.tx.clone();
                        thread::spawn(move || {
                            let result = discussions
                                .load_answers(question_id)
                                .map_err(|err| err.to_string());
                            let _ = tx.send(Msg::Answers(question_id, result));
                        });
                    }
                    Err(err) => {
                        detail.status = format!("Failed to submit answer: {err}");
                    }
                }
            }
            Msg::CommentSubmitted(question_id, answer_id, result) => {
                let Some(detail) = &mut self.detail else {
                    return;
                };
                if detail.question.question_id != question_id {
                    return;
                }
                match result {
                    Ok(()) => {
                        detail.status = "Comment submitted.".into();
                        // Refetch so the new comment shows up.
                        detail.comments.remove(&answer_id);
                        let discussions = self.discussions.clone();
                        let tx = self.tx.clone();
                        thread::spawn(move || {
                            let result = discussions
                                .load_comments(answer_id)
                                .map_err(|err| err.to_string());
                            let _ = tx.send(Msg::Comments(question_id, answer_id, result));
                        });
                    }
                    Err(err) => {
                        detail.status = format!("Failed to submit comment: {err}");
                    }
                }
            }
            Msg::Positions(result) => {
                let Some(draft) = &mut self.draft else {
                    return;
                };
                match result {
                    Ok(positions) => draft.positions = positions,
                    Err(err) => {
                        // The category step is skipped; the draft still works.
                        tracing::warn!(error = %err, "failed to load position list");
                    }
                }
            }
            Msg::QuestionCreated(result) => match result {
                Ok(()) => {
                    self.draft = None;
                    self.status_message = "Question submitted.".into();
                    let ticket = self.questions.reset(QueryKey::default());
                    self.dispatch_questions(ticket);
                }
                Err(err) => {
                    if let Some(draft) = &mut self.draft {
                        draft.status = format!("Failed to submit question: {err}");
                    }
                }
            },
        }
    }

    // --- key handling ---------------------------------------------------

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        if self.draft.is_some() {
            self.handle_draft_key(key);
            return;
        }
        match self.input_mode {
            InputMode::Search => self.handle_search_key(key),
            InputMode::Compose => self.handle_compose_key(key),
            InputMode::Normal => {
                if self.job_detail.is_some() {
                    self.handle_job_detail_key(key);
                } else if self.detail.is_some() {
                    self.handle_detail_key(key);
                } else {
                    self.handle_list_key(key);
                }
            }
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.apply_search(String::new());
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Enter => {
                let term = self.input_buffer.clone();
                self.apply_search(term);
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
                if self.tab != Tab::JobPostings {
                    self.apply_search(self.input_buffer.clone());
                }
            }
            KeyCode::Char(ch) => {
                self.input_buffer.push(ch);
                // Companies and questions filter live; job postings search
                // is a server-side query applied on Enter.
                if self.tab != Tab::JobPostings {
                    self.apply_search(self.input_buffer.clone());
                }
            }
            _ => {}
        }
    }

    fn handle_compose_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.compose_comment_on = None;
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input_buffer);
                self.input_mode = InputMode::Normal;
                let target = self.compose_comment_on.take();
                if !text.trim().is_empty() {
                    match target {
                        Some(answer_id) => self.submit_comment(answer_id, text.trim().to_string()),
                        None => self.submit_answer(text.trim().to_string()),
                    }
                }
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            KeyCode::Char(ch) => {
                self.input_buffer.push(ch);
            }
            _ => {}
        }
    }

    fn handle_list_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Tab => self.next_tab(),
            KeyCode::Char('1') => self.activate_tab(Tab::Questions),
            KeyCode::Char('2') => self.activate_tab(Tab::Companies),
            KeyCode::Char('3') => self.activate_tab(Tab::JobPostings),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(self.list_height.max(1) as isize),
            KeyCode::PageUp => self.move_selection(-(self.list_height.max(1) as isize)),
            KeyCode::Char('g') | KeyCode::Home => self.select_absolute(0),
            KeyCode::Char('G') | KeyCode::End => {
                let last = self.visible_len().saturating_sub(1);
                self.select_absolute(last);
            }
            KeyCode::Char('/') => {
                self.input_buffer = self.current_search();
                self.input_mode = InputMode::Search;
            }
            KeyCode::Char('r') => self.reload_current(),
            KeyCode::Char('R') => self.refresh_directory(),
            KeyCode::Char('f') => self.cycle_employment_filter(),
            KeyCode::Char('w') => self.cycle_location_filter(),
            KeyCode::Char('n') => {
                if self.tab == Tab::Questions {
                    self.start_question_draft();
                }
            }
            KeyCode::Enter => match self.tab {
                Tab::Questions => {
                    if let Some(idx) = self.selected_item_index() {
                        let question = self.questions.items()[idx].clone();
                        self.open_question_detail(question);
                    }
                }
                Tab::JobPostings => {
                    if let Some(idx) = self.selected_item_index() {
                        let posting = self.job_postings.items()[idx].clone();
                        self.job_detail = Some(JobDetail { posting, scroll: 0 });
                    }
                }
                Tab::Companies => {}
            },
            _ => {}
        }
    }

    fn handle_job_detail_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.job_detail = None,
            KeyCode::Char('j') | KeyCode::Down => {
                if let Some(detail) = &mut self.job_detail {
                    detail.scroll = detail.scroll.saturating_add(1);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if let Some(detail) = &mut self.job_detail {
                    detail.scroll = detail.scroll.saturating_sub(1);
                }
            }
            KeyCode::Char('g') | KeyCode::Home => {
                if let Some(detail) = &mut self.job_detail {
                    detail.scroll = 0;
                }
            }
            _ => {}
        }
    }

    fn handle_detail_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.detail = None,
            KeyCode::Char('j') | KeyCode::Down => {
                if let Some(detail) = &mut self.detail {
                    if detail.selected + 1 < detail.answers.len() {
                        detail.selected += 1;
                    }
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if let Some(detail) = &mut self.detail {
                    detail.selected = detail.selected.saturating_sub(1);
                }
            }
            KeyCode::Enter => self.load_comments_for_selection(),
            KeyCode::Char('a') => {
                self.input_buffer.clear();
                self.compose_comment_on = None;
                self.input_mode = InputMode::Compose;
            }
            KeyCode::Char('c') => {
                let Some(detail) = &self.detail else {
                    return;
                };
                let Some(answer) = detail.answers.get(detail.selected) else {
                    return;
                };
                self.compose_comment_on = Some(answer.answer_id);
                self.input_buffer.clear();
                self.input_mode = InputMode::Compose;
            }
            _ => {}
        }
    }

    // --- feed plumbing ---------------------------------------------------

    fn next_tab(&mut self) {
        let next = match self.tab {
            Tab::Questions => Tab::Companies,
            Tab::Companies => Tab::JobPostings,
            Tab::JobPostings => Tab::Questions,
        };
        self.activate_tab(next);
    }

    fn activate_tab(&mut self, tab: Tab) {
        self.tab = tab;
        match tab {
            Tab::Companies if !self.companies_started => {
                self.companies_started = true;
                let ticket = self.companies.reset(QueryKey::default());
                self.dispatch_companies(ticket);
            }
            Tab::JobPostings if !self.jobs_started => {
                self.jobs_started = true;
                let ticket = self.job_postings.reset(self.job_posting_query());
                self.dispatch_job_postings(ticket);
            }
            _ => {}
        }
    }

    fn job_posting_query(&self) -> QueryKey {
        QueryKey {
            company_name: {
                let term = self.job_postings.search().trim();
                (!term.is_empty()).then(|| term.to_string())
            },
            employment_type: self
                .employment_filter
                .map(|idx| EMPLOYMENT_TYPES[idx].to_string()),
            work_location: self
                .location_filter
                .map(|idx| WORK_LOCATIONS[idx].to_string()),
        }
    }

    fn apply_search(&mut self, term: String) {
        match self.tab {
            Tab::Questions => self.questions.set_search(term),
            Tab::Companies => self.companies.set_search(term),
            Tab::JobPostings => {
                // Server-side filter: a new query key, new sequence. A page
                // still in flight for the old key will be dropped on arrival.
                self.job_postings.set_search(term.clone());
                let mut query = self.job_posting_query();
                query.company_name = {
                    let term = term.trim();
                    (!term.is_empty()).then(|| term.to_string())
                };
                let ticket = self.job_postings.reset(query);
                self.dispatch_job_postings(ticket);
            }
        }
        self.select_absolute(0);
    }

    fn current_search(&self) -> String {
        match self.tab {
            Tab::Questions => self.questions.search().to_string(),
            Tab::Companies => self.companies.search().to_string(),
            Tab::JobPostings => self.job_postings.search().to_string(),
        }
    }

    fn reload_current(&mut self) {
        match self.tab {
            Tab::Questions => {
                let ticket = self.questions.reset(QueryKey::default());
                self.dispatch_questions(ticket);
            }
            Tab::Companies => {
                self.companies_started = true;
                let ticket = self.companies.reset(QueryKey::default());
                self.dispatch_companies(ticket);
            }
            Tab::JobPostings => {
                self.jobs_started = true;
                let ticket = self.job_postings.reset(self.job_posting_query());
                self.dispatch_job_postings(ticket);
            }
        }
        self.select_absolute(0);
        self.status_message = "Reloading...".into();
    }

    fn refresh_directory(&mut self) {
        self.status_message = "Refreshing company directory...".into();
        let directory = self.directory.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = directory
                .refresh()
                .map(|companies| companies.len())
                .map_err(|err| err.to_string());
            let _ = tx.send(Msg::DirectoryLoaded(result));
        });
    }

    fn cycle_employment_filter(&mut self) {
        if self.tab != Tab::JobPostings {
            return;
        }
        self.employment_filter = match self.employment_filter {
            None => Some(0),
            Some(idx) if idx + 1 < EMPLOYMENT_TYPES.len() => Some(idx + 1),
            Some(_) => None,
        };
        self.jobs_started = true;
        let ticket = self.job_postings.reset(self.job_posting_query());
        self.dispatch_job_postings(ticket);
        self.select_absolute(0);
    }

    fn cycle_location_filter(&mut self) {
        if self.tab != Tab::JobPostings {
            return;
        }
        self.location_filter = match self.location_filter {
            None => Some(0),
            Some(idx) if idx + 1 < WORK_LOCATIONS.len() => Some(idx + 1),
            Some(_) => None,
        };
        self.jobs_started = true;
        let ticket = self.job_postings.reset(self.job_posting_query());
        self.dispatch_job_postings(ticket);
        self.select_absolute(0);
    }

    fn visible_indices(&self) -> Vec<usize> {
        match self.tab {
            Tab::Questions => self.questions.visible_indices(|q| q.question.as_str()),
            Tab::Companies => self.companies.visible_indices(|c| c.company_name.as_str()),
            // Job posting search is server-side; everything fetched is shown.
            Tab::JobPostings => (0..self.job_postings.len()).collect(),
        }
    }

    fn visible_len(&self) -> usize {
        self.visible_indices().len()
    }

    fn selection(&self) -> usize {
        *self.selected.get(self.tab.title()).unwrap_or(&0)
    }

    fn scroll_offset(&self) -> usize {
        *self.offset.get(self.tab.title()).unwrap_or(&0)
    }

    fn select_absolute(&mut self, index: usize) {
        let len = self.visible_len();
        let clamped = if len == 0 { 0 } else { index.min(len - 1) };
        self.selected.insert(self.tab.title(), clamped);
        self.sync_scroll();
        self.maybe_fetch_more();
    }

    fn move_selection(&mut self, delta: isize) {
        let current = self.selection() as isize;
        let next = (current + delta).max(0) as usize;
        self.select_absolute(next);
    }

    fn sync_scroll(&mut self) {
        let selected = self.selection();
        let height = self.list_height.max(1);
        let mut offset = self.scroll_offset();
        if selected < offset {
            offset = selected;
        } else if selected >= offset + height {
            offset = selected + 1 - height;
        }
        self.offset.insert(self.tab.title(), offset);
    }

    /// Asks the active feed for the next page when the viewport is close to
    /// the bottom of the accumulated list.
    fn maybe_fetch_more(&mut self) {
        let metrics = ScrollMetrics {
            viewport: self.list_height,
            scrolled: self.scroll_offset(),
            content_height: self.visible_len(),
        };
        match self.tab {
            Tab::Questions => {
                if let Some(ticket) = self.questions.maybe_fetch_more(metrics) {
                    self.dispatch_questions(ticket);
                }
            }
            Tab::Companies => {
                if let Some(ticket) = self.companies.maybe_fetch_more(metrics) {
                    self.dispatch_companies(ticket);
                }
            }
            Tab::JobPostings => {
                if let Some(ticket) = self.job_postings.maybe_fetch_more(metrics) {
                    self.dispatch_job_postings(ticket);
                }
            }
        }
    }

    fn selected_item_index(&self) -> Option<usize> {
        self.visible_indices().get(self.selection()).copied()
    }

    // --- drawing ---------------------------------------------------------

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .split(frame.size());

        self.draw_tabs(frame, chunks[0]);
        self.list_height = chunks[1].height.saturating_sub(2) as usize;
        if self.draft.is_some() {
            self.draw_compose_question(frame, chunks[1]);
        } else if self.job_detail.is_some() {
            self.draw_job_detail(frame, chunks[1]);
        } else if self.detail.is_some() {
            self.draw_detail(frame, chunks[1]);
        } else {
            self.draw_list(frame, chunks[1]);
        }
        self.draw_status(frame, chunks[2]);

        // The viewport size is only known here; a taller terminal may
        // expose the bottom of the list without any key press.
        self.maybe_fetch_more();
    }

    fn draw_tabs(&self, frame: &mut ratatui::Frame, area: Rect) {
        let titles: Vec<Line> = [Tab::Questions, Tab::Companies, Tab::JobPostings]
            .iter()
            .map(|tab| Line::from(tab.title()))
            .collect();
        let index = match self.tab {
            Tab::Questions => 0,
            Tab::Companies => 1,
            Tab::JobPostings => 2,
        };
        let tabs = Tabs::new(titles)
            .select(index)
            .block(Block::default().borders(Borders::ALL).title("bumaview"))
            .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
        frame.render_widget(tabs, area);
    }

    fn row_lines(&self, index: usize) -> Line<'static> {
        match self.tab {
            Tab::Questions => {
                let question = &self.questions.items()[index];
                let company = self.directory.name(question.company_id);
                Line::from(vec![
                    Span::styled(
                        format!("[{}] ", non_empty(&question.category, "기타")),
                        Style::default().fg(Color::Yellow),
                    ),
                    Span::raw(question.question.clone()),
                    Span::styled(format!("  · {company}"), Style::default().fg(Color::DarkGray)),
                ])
            }
            Tab::Companies => {
                let company = &self.companies.items()[index];
                Line::from(company.company_name.clone())
            }
            Tab::JobPostings => {
                let posting = &self.job_postings.items()[index];
                let company = self.directory.name(posting.company_id);
                Line::from(vec![
                    Span::raw(format!("{company} · ")),
                    Span::raw(non_empty(&posting.overview, &posting.job_id).to_string()),
                    Span::styled(
                        format!(
                            "  [{} | {}]",
                            non_empty(&posting.employment_type, "-"),
                            non_empty(&posting.work_location, "-")
                        ),
                        Style::default().fg(Color::DarkGray),
                    ),
                ])
            }
        }
    }

    fn draw_list(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let visible = self.visible_indices();
        let offset = self.scroll_offset();
        let selected = self.selection();
        let height = area.height.saturating_sub(2) as usize;

        let items: Vec<ListItem> = visible
            .iter()
            .enumerate()
            .skip(offset)
            .take(height)
            .map(|(pos, &idx)| {
                let line = self.row_lines(idx);
                let item = ListItem::new(line);
                if pos == selected {
                    item.style(
                        Style::default()
                            .bg(Color::Rgb(23, 26, 31))
                            .add_modifier(Modifier::BOLD),
                    )
                } else {
                    item
                }
            })
            .collect();

        let title = format!(
            "{} ({}{})",
            self.tab.title(),
            visible.len(),
            match self.active_state() {
                LoadState::FetchingInitial => ", loading...",
                LoadState::FetchingMore => ", loading more...",
                LoadState::Exhausted => ", end",
                LoadState::Errored => ", failed",
                LoadState::Idle => "",
            }
        );
        let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(list, area);
    }

    fn draw_detail(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let Some(detail) = &self.detail else {
            return;
        };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(3)])
            .split(area);

        let company = self.directory.name(detail.question.company_id);
        let width = chunks[0].width.saturating_sub(4).max(20) as usize;
        let body = textwrap::fill(&detail.question.question, width);
        let header = Paragraph::new(format!(
            "{body}\n\n{company} · {} · {}",
            non_empty(&detail.question.category, "기타"),
            non_empty(&detail.question.question_at, "-"),
        ))
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Question"));
        frame.render_widget(header, chunks[0]);

        let mut lines: Vec<Line> = Vec::new();
        for (idx, answer) in detail.answers.iter().enumerate() {
            let marker = if idx == detail.selected { "> " } else { "  " };
            lines.push(Line::from(vec![
                Span::styled(
                    format!("{marker}{} ", non_empty(&answer.author_name, "익명")),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw(answer.answer.clone()),
            ]));
            if let Some(comments) = detail.comments.get(&answer.answer_id) {
                for comment in comments {
                    lines.push(Line::from(Span::styled(
                        format!(
                            "      └ {}: {}",
                            non_empty(&comment.author_name, "익명"),
                            comment.comment
                        ),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
            }
        }
        if detail.loading {
            lines.push(Line::from("Loading answers..."));
        } else if detail.answers.is_empty() {
            lines.push(Line::from("No answers yet. Press 'a' to write one."));
        }

        let answers = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(detail.status.clone()));
        frame.render_widget(answers, chunks[1]);
    }

    fn draw_compose_question(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let matches = self.draft_company_matches();
        let Some(draft) = &self.draft else {
            return;
        };
        match draft.step {
            DraftStep::Company => {
                let items: Vec<ListItem> = matches
                    .iter()
                    .enumerate()
                    .map(|(idx, company)| {
                        let item = ListItem::new(company.company_name.clone());
                        if idx == draft.selected {
                            item.style(
                                Style::default()
                                    .bg(Color::Rgb(23, 26, 31))
                                    .add_modifier(Modifier::BOLD),
                            )
                        } else {
                            item
                        }
                    })
                    .collect();
                let title = format!("New question: company ({})", non_empty(&draft.filter, "all"));
                let list =
                    List::new(items).block(Block::default().borders(Borders::ALL).title(title));
                frame.render_widget(list, area);
            }
            DraftStep::Text => {
                let company = draft
                    .company
                    .as_ref()
                    .map(|company| company.company_name.clone())
                    .unwrap_or_default();
                let body = format!("{}▏", draft.text);
                let input = Paragraph::new(body)
                    .wrap(Wrap { trim: false })
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("New question for {company}")),
                    );
                frame.render_widget(input, area);
            }
            DraftStep::Category => {
                let items: Vec<ListItem> = draft
                    .positions
                    .iter()
                    .enumerate()
                    .map(|(idx, position)| {
                        let item = ListItem::new(position.position_name.clone());
                        if idx == draft.category_selected {
                            item.style(
                                Style::default()
                                    .bg(Color::Rgb(23, 26, 31))
                                    .add_modifier(Modifier::BOLD),
                            )
                        } else {
                            item
                        }
                    })
                    .collect();
                let list = List::new(items)
                    .block(Block::default().borders(Borders::ALL).title("Category"));
                frame.render_widget(list, area);
            }
        }
    }

    fn draw_job_detail(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let Some(detail) = &self.job_detail else {
            return;
        };
        let posting = &detail.posting;
        let company = self.directory.name(posting.company_id);
        let width = area.width.saturating_sub(4).max(20) as usize;

        let mut lines: Vec<Line<'static>> = Vec::new();
        lines.push(Line::from(Span::styled(
            format!(
                "{} · {} · {}",
                non_empty(&posting.employment_type, "-"),
                non_empty(&posting.work_location, "-"),
                non_empty(&posting.application_deadline, "상시"),
            ),
            Style::default().fg(Color::DarkGray),
        )));
        if !posting.tech_stacks.is_empty() {
            let stacks: Vec<&str> = posting
                .tech_stacks
                .iter()
                .map(|stack| stack.tech_name.as_str())
                .collect();
            lines.push(Line::from(Span::styled(
                stacks.join(", "),
                Style::default().fg(Color::Cyan),
            )));
        }
        lines.push(Line::from(""));
        push_section(&mut lines, "Overview", &posting.overview, width);
        push_section(
            &mut lines,
            "Key responsibilities",
            &posting.key_responsibilities,
            width,
        );
        push_section(
            &mut lines,
            "Preferred qualifications",
            &posting.preferred_qualifications,
            width,
        );
        push_section(
            &mut lines,
            "Benefits and perks",
            &posting.benefits_and_perks,
            width,
        );
        push_section(&mut lines, "Hiring process", &posting.hiring_process, width);

        let title = format!("{company} · {}", non_empty(&posting.job_id, "job posting"));
        let body = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .scroll((detail.scroll, 0))
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(body, area);
    }

    fn draw_status(&self, frame: &mut ratatui::Frame, area: Rect) {
        if let Some(draft) = &self.draft {
            frame.render_widget(
                Paragraph::new(draft.status.clone()).style(Style::default().fg(Color::Gray)),
                area,
            );
            return;
        }
        let text = match self.input_mode {
            InputMode::Search => format!("search: {}▏", self.input_buffer),
            InputMode::Compose => {
                let label = if self.compose_comment_on.is_some() {
                    "comment"
                } else {
                    "answer"
                };
                format!("{label}: {}▏", self.input_buffer)
            }
            InputMode::Normal => {
                let mut filters = Vec::new();
                if let Some(idx) = self.employment_filter {
                    filters.push(format!("f:{}", EMPLOYMENT_TYPES[idx]));
                }
                if let Some(idx) = self.location_filter {
                    filters.push(format!("w:{}", WORK_LOCATIONS[idx]));
                }
                if filters.is_empty() {
                    self.status_message.clone()
                } else {
                    format!("{} [{}]", self.status_message, filters.join(" "))
                }
            }
        };
        frame.render_widget(
            Paragraph::new(text).style(Style::default().fg(Color::Gray)),
            area,
        );
    }

    fn active_state(&self) -> LoadState {
        match self.tab {
            Tab::Questions => self.questions.state(),
            Tab::Companies => self.companies.state(),
            Tab::JobPostings => self.job_postings.state(),
        }
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn push_section(lines: &mut Vec<Line<'static>>, title: &str, body: &str, width: usize) {
    if body.trim().is_empty() {
        return;
    }
    lines.push(Line::from(Span::styled(
        title.to_string(),
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )));
    for row in textwrap::fill(body, width).lines() {
        lines.push(Line::from(row.to_string()));
    }
    lines.push(Line::from(""));
}
