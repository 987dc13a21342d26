use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use bumaview_tui::api::{ApiError, Client, ClientConfig, NewQuestion, StaticToken};
use bumaview_tui::feed::PageRequest;
use tiny_http::{Response, Server};

struct Stub {
    base_url: String,
    requests: mpsc::Receiver<RecordedRequest>,
}

struct RecordedRequest {
    method: String,
    url: String,
    authorization: Option<String>,
}

/// Serves one canned body per incoming request, in order, recording what
/// the client sent.
fn stub_server(responses: Vec<(u16, &'static str)>) -> Stub {
    let server = Server::http("127.0.0.1:0").expect("bind stub server");
    let port = server.server_addr().to_ip().expect("ip addr").port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok(request) = server.recv() else {
                return;
            };
            let authorization = request
                .headers()
                .iter()
                .find(|header| header.field.equiv("Authorization"))
                .map(|header| header.value.as_str().to_string());
            let recorded = RecordedRequest {
                method: request.method().to_string(),
                url: request.url().to_string(),
                authorization,
            };
            let _ = tx.send(recorded);
            let _ = request.respond(Response::from_string(body).with_status_code(status));
        }
    });
    Stub {
        base_url: format!("http://127.0.0.1:{port}/"),
        requests: rx,
    }
}

fn client_for(stub: &Stub, token: Option<&str>) -> Client {
    Client::new(ClientConfig {
        base_url: Some(stub.base_url.clone()),
        user_agent: "bumaview-tui-tests/0.1".into(),
        token_provider: token.map(|token| {
            Arc::new(StaticToken::new(token)) as Arc<dyn bumaview_tui::api::TokenProvider>
        }),
        http_client: None,
    })
    .expect("build client")
}

#[test]
fn companies_sends_cursor_and_size() {
    let stub = stub_server(vec![
        (
            200,
            r#"{"values":[{"company_id":1,"company_name":"카카오"},{"company_id":2,"company_name":"네이버"}],"has_next":true}"#,
        ),
        (
            200,
            r#"{"values":[{"company_id":3,"company_name":"토스"}],"has_next":false}"#,
        ),
    ]);
    let client = client_for(&stub, None);

    let first = client
        .companies(PageRequest {
            cursor_id: None,
            size: 2,
        })
        .unwrap();
    assert_eq!(first.values.len(), 2);
    assert!(first.has_next);

    let second = client
        .companies(PageRequest {
            cursor_id: Some(2),
            size: 2,
        })
        .unwrap();
    assert_eq!(second.values[0].company_name, "토스");
    assert!(!second.has_next);

    let first_req = stub.requests.recv().unwrap();
    assert_eq!(first_req.method, "GET");
    assert!(first_req.url.starts_with("/companies/"));
    assert!(!first_req.url.contains("cursor_id"));
    assert!(first_req.url.contains("size=2"));
    assert!(
        first_req.authorization.is_none(),
        "list reads must not require a token"
    );

    let second_req = stub.requests.recv().unwrap();
    assert!(second_req.url.contains("cursor_id=2"));
}

#[test]
fn job_postings_carry_filter_params() {
    let stub = stub_server(vec![(200, r#"{"values":[],"has_next":false}"#)]);
    let client = client_for(&stub, None);

    let query = bumaview_tui::feed::QueryKey {
        company_name: Some("카카오".into()),
        employment_type: Some("신입".into()),
        work_location: Some("서울".into()),
    };
    let page = client
        .job_postings(
            &query,
            PageRequest {
                cursor_id: None,
                size: 20,
            },
        )
        .unwrap();
    assert!(page.values.is_empty());

    let req = stub.requests.recv().unwrap();
    assert!(req.url.starts_with("/companies/job-postings"));
    assert!(req.url.contains("company_name="));
    assert!(req.url.contains("employment_type="));
    assert!(req.url.contains("work_location="));
}

#[test]
fn malformed_list_payload_degrades_to_final_empty_page() {
    let stub = stub_server(vec![(200, r#"{"unexpected":true}"#)]);
    let client = client_for(&stub, None);

    let page = client
        .questions(PageRequest {
            cursor_id: None,
            size: 20,
        })
        .unwrap();
    assert!(page.values.is_empty());
    assert!(!page.has_next);
}

#[test]
fn server_error_surfaces_status() {
    let stub = stub_server(vec![(500, "boom")]);
    let client = client_for(&stub, None);

    let err = client
        .companies(PageRequest {
            cursor_id: None,
            size: 20,
        })
        .unwrap_err();
    match err {
        ApiError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[test]
fn unauthorized_is_its_own_error() {
    let stub = stub_server(vec![(401, "")]);
    let client = client_for(&stub, None);

    let err = client
        .companies(PageRequest {
            cursor_id: None,
            size: 20,
        })
        .unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
}

#[test]
fn mutating_calls_require_a_token() {
    let stub = stub_server(vec![]);
    let client = client_for(&stub, None);

    let err = client.submit_answer(7, "답변입니다").unwrap_err();
    assert!(matches!(err, ApiError::TokenRequired));
}

#[test]
fn mutating_calls_send_bearer_token() {
    let stub = stub_server(vec![(200, "{}"), (200, "{}"), (200, "{}")]);
    let client = client_for(&stub, Some("tkn-123"));

    client.submit_answer(7, "답변입니다").unwrap();
    let req = stub.requests.recv().unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.url, "/questions/7/answers");
    assert_eq!(req.authorization.as_deref(), Some("Bearer tkn-123"));

    client.submit_comment(11, "감사합니다").unwrap();
    let req = stub.requests.recv().unwrap();
    assert_eq!(req.url, "/answers/11/comments");

    client
        .create_question(&NewQuestion {
            question: "자기소개를 해주세요".into(),
            company_id: 1,
            category: "인성 면접".into(),
            tag: String::new(),
        })
        .unwrap();
    let req = stub.requests.recv().unwrap();
    assert_eq!(req.url, "/questions/single");
    assert_eq!(req.authorization.as_deref(), Some("Bearer tkn-123"));
}

#[test]
fn positions_unwrap_the_envelope() {
    let stub = stub_server(vec![(
        200,
        r#"{"values":[{"position_id":1,"position_name":"프론트엔드"},{"position_id":2,"position_name":"백엔드"}],"has_next":false}"#,
    )]);
    let client = client_for(&stub, None);

    let positions = client.positions().unwrap();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[1].position_name, "백엔드");

    let req = stub.requests.recv().unwrap();
    assert!(req.url.starts_with("/users/positions"));
}

#[test]
fn answers_and_comments_decode_legacy_shapes() {
    let stub = stub_server(vec![
        (
            200,
            r#"{"values":[{"id":5,"content":"상황을 설명했습니다","author":"김개발"}],"has_next":false}"#,
        ),
        (
            200,
            r#"{"values":[{"reply_id":9,"reply":"좋은 답변이네요"}],"has_next":false}"#,
        ),
    ]);
    let client = client_for(&stub, None);

    let answers = client.answers(5).unwrap();
    assert_eq!(answers[0].answer_id, 5);
    assert_eq!(answers[0].answer, "상황을 설명했습니다");
    assert_eq!(answers[0].author_name, "김개발");

    let comments = client.comments(5).unwrap();
    assert_eq!(comments[0].answer_comment_id, 9);
    assert_eq!(comments[0].comment, "좋은 답변이네요");
}
