use std::sync::Arc;

use crate::api::{
    self, Answer, ApiError, CommentEntry, Company, JobPosting, NewQuestion, Position, Question,
};
use crate::feed::{Entity, Page, PageRequest, QueryKey};

/// One paginated endpoint, abstracted so feeds can run against the real API,
/// a stub server, or canned data in tests.
pub trait PageSource<T>: Send + Sync {
    fn fetch_page(&self, query: &QueryKey, req: PageRequest) -> Result<Page<T>, ApiError>;
}

/// Detail and contribution operations: a question's answers and their
/// comments, plus the authenticated submission paths including new
/// questions. Position names double as the category choices when composing.
pub trait DiscussionService: Send + Sync {
    fn load_answers(&self, question_id: i64) -> Result<Vec<Answer>, ApiError>;
    fn load_comments(&self, answer_id: i64) -> Result<Vec<CommentEntry>, ApiError>;
    fn positions(&self) -> Result<Vec<Position>, ApiError>;
    fn submit_answer(&self, question_id: i64, answer: &str) -> Result<(), ApiError>;
    fn submit_comment(&self, answer_id: i64, comment: &str) -> Result<(), ApiError>;
    fn create_question(&self, question: &NewQuestion) -> Result<(), ApiError>;
}

pub struct CompanyPages {
    client: Arc<api::Client>,
}

impl CompanyPages {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl PageSource<Company> for CompanyPages {
    fn fetch_page(&self, _query: &QueryKey, req: PageRequest) -> Result<Page<Company>, ApiError> {
        self.client.companies(req)
    }
}

pub struct QuestionPages {
    client: Arc<api::Client>,
}

impl QuestionPages {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl PageSource<Question> for QuestionPages {
    fn fetch_page(&self, _query: &QueryKey, req: PageRequest) -> Result<Page<Question>, ApiError> {
        self.client.questions(req)
    }
}

pub struct JobPostingPages {
    client: Arc<api::Client>,
}

impl JobPostingPages {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl PageSource<JobPosting> for JobPostingPages {
    fn fetch_page(&self, query: &QueryKey, req: PageRequest) -> Result<Page<JobPosting>, ApiError> {
        self.client.job_postings(query, req)
    }
}

pub struct ApiDiscussionService {
    client: Arc<api::Client>,
}

impl ApiDiscussionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl DiscussionService for ApiDiscussionService {
    fn load_answers(&self, question_id: i64) -> Result<Vec<Answer>, ApiError> {
        self.client.answers(question_id)
    }

    fn load_comments(&self, answer_id: i64) -> Result<Vec<CommentEntry>, ApiError> {
        self.client.comments(answer_id)
    }

    fn positions(&self) -> Result<Vec<Position>, ApiError> {
        self.client.positions()
    }

    fn submit_answer(&self, question_id: i64, answer: &str) -> Result<(), ApiError> {
        self.client.submit_answer(question_id, answer)
    }

    fn submit_comment(&self, answer_id: i64, comment: &str) -> Result<(), ApiError> {
        self.client.submit_comment(answer_id, comment)
    }

    fn create_question(&self, question: &NewQuestion) -> Result<(), ApiError> {
        self.client.create_question(question)
    }
}

/// Serves slices of a fixed item list, paged by cursor exactly like the
/// server does. Used by unit tests and the directory's cache tests.
pub struct StaticPages<T> {
    items: Vec<T>,
    calls: std::sync::atomic::AtomicUsize,
}

impl<T: Entity + Clone + Send + Sync> StaticPages<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl<T: Entity + Clone + Send + Sync> PageSource<T> for StaticPages<T> {
    fn fetch_page(&self, _query: &QueryKey, req: PageRequest) -> Result<Page<T>, ApiError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let start = match req.cursor_id {
            Some(cursor) => self
                .items
                .iter()
                .position(|item| item.entity_id() == cursor)
                .map(|idx| idx + 1)
                .unwrap_or(self.items.len()),
            None => 0,
        };
        let end = (start + req.size.max(1) as usize).min(self.items.len());
        Ok(Page {
            values: self.items[start..end].to_vec(),
            has_next: end < self.items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Company;

    fn companies(n: i64) -> Vec<Company> {
        (1..=n)
            .map(|id| Company {
                company_id: id,
                company_name: format!("회사{id}"),
            })
            .collect()
    }

    #[test]
    fn static_pages_walk_the_whole_list() {
        let source = StaticPages::new(companies(45));
        let query = QueryKey::default();

        let first = source
            .fetch_page(
                &query,
                PageRequest {
                    cursor_id: None,
                    size: 20,
                },
            )
            .unwrap();
        assert_eq!(first.values.len(), 20);
        assert!(first.has_next);

        let second = source
            .fetch_page(
                &query,
                PageRequest {
                    cursor_id: Some(20),
                    size: 20,
                },
            )
            .unwrap();
        assert_eq!(second.values[0].company_id, 21);

        let last = source
            .fetch_page(
                &query,
                PageRequest {
                    cursor_id: Some(40),
                    size: 20,
                },
            )
            .unwrap();
        assert_eq!(last.values.len(), 5);
        assert!(!last.has_next);
        assert_eq!(source.calls(), 3);
    }
}
