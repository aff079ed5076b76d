mod common;

use common::WALLET;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wallet_insights::execution::{DryRunOptions, EngineValue};
use wallet_insights::templates::RenderedQuery;
use wallet_insights::{
    BigQueryConfig, BigQueryEngine, CostPolicy, EngineErrorKind, EnginePhase, InsightsError, QueryEngine,
    WalletInsights, WalletQuery,
};

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    target: String,
    head: String,
    body: String,
}

/// Local HTTP server that answers each connection with the next canned
/// response, repeating the last one once the list runs out.
struct ScriptedServer {
    url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedServer {
    async fn start(responses: Vec<(u16, Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let (status, body) = responses[served.min(responses.len() - 1)].clone();
                served += 1;
                if let Some(request) = answer(stream, status, &body).await {
                    recorded.lock().unwrap().push(request);
                }
            }
        });

        Self {
            url: format!("http://{}", addr),
            requests,
        }
    }

    fn engine(&self) -> BigQueryEngine {
        let mut config = BigQueryConfig::new("test-project");
        config.api_url = self.url.clone();
        config.access_token = Some("test-token".to_string());
        BigQueryEngine::new(config).unwrap()
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(mut stream: TcpStream, status: u16, body: &Value) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let raw_head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut request_line = raw_head.lines().next().unwrap_or("").split_whitespace();
    let request = RecordedRequest {
        method: request_line.next().unwrap_or("").to_string(),
        target: request_line.next().unwrap_or("").to_string(),
        head,
        body: String::from_utf8_lossy(&buffer[header_end..]).to_string(),
    };

    let payload = body.to_string();
    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()?;
    Some(request)
}

fn job_reference() -> Value {
    json!({"projectId": "test-project", "jobId": "job_1", "location": "US"})
}

#[tokio::test]
async fn test_execute_waits_for_completion_and_follows_pages() {
    let server = ScriptedServer::start(vec![
        (200, json!({"jobReference": job_reference(), "jobComplete": false})),
        (
            200,
            json!({
                "jobReference": job_reference(),
                "jobComplete": true,
                "schema": {"fields": [
                    {"name": "from_address", "type": "STRING"},
                    {"name": "value_usdc", "type": "NUMERIC"}
                ]},
                "rows": [
                    {"f": [{"v": "0xaaa"}, {"v": "1.5"}]},
                    {"f": [{"v": "0xbbb"}, {"v": "2"}]}
                ],
                "pageToken": "page-2"
            }),
        ),
        (
            200,
            json!({
                "jobReference": job_reference(),
                "jobComplete": true,
                "rows": [{"f": [{"v": "0xccc"}, {"v": "3.25"}]}]
            }),
        ),
    ])
    .await;

    let rows = server
        .engine()
        .execute(&RenderedQuery::raw("SELECT from_address, value_usdc FROM t"))
        .await
        .unwrap();

    let addresses: Vec<_> = rows.iter().map(|r| r.get("from_address").cloned()).collect();
    assert_eq!(
        addresses,
        vec![
            Some(EngineValue::Text("0xaaa".to_string())),
            Some(EngineValue::Text("0xbbb".to_string())),
            Some(EngineValue::Text("0xccc".to_string())),
        ]
    );
    // the last page carries no schema; the first page's is reused
    assert_eq!(rows[2].get("value_usdc"), Some(&EngineValue::Numeric("3.25".to_string())));

    let requests = server.requests();
    assert_eq!(requests.len(), 3);

    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].target, "/projects/test-project/queries");
    assert!(requests[0].head.contains("authorization: bearer test-token"));
    let submitted: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(submitted["dryRun"], json!(false));
    assert_eq!(submitted["query"], json!("SELECT from_address, value_usdc FROM t"));

    assert_eq!(requests[1].method, "GET");
    assert!(requests[1].target.starts_with("/projects/test-project/queries/job_1?"));
    assert!(requests[1].target.contains("location=US"));
    assert!(!requests[1].target.contains("pageToken"));

    assert!(requests[2].target.starts_with("/projects/test-project/queries/job_1?"));
    assert!(requests[2].target.contains("pageToken=page-2"));
}

#[tokio::test]
async fn test_execute_keeps_rows_when_job_reports_a_warning() {
    let server = ScriptedServer::start(vec![(
        200,
        json!({
            "jobReference": job_reference(),
            "jobComplete": true,
            "schema": {"fields": [{"name": "total_transactions", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "12"}]}],
            "errors": [{"reason": "warning", "message": "Some non-fatal warning"}]
        }),
    )])
    .await;

    let rows = server.engine().execute(&RenderedQuery::raw("SELECT 12")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("total_transactions"), Some(&EngineValue::Int64(12)));
}

#[tokio::test]
async fn test_dry_run_reads_total_bytes_processed() {
    let server = ScriptedServer::start(vec![(
        200,
        json!({
            "jobReference": job_reference(),
            "jobComplete": true,
            "totalBytesProcessed": "1234567890",
            "errors": [{"reason": "warning", "message": "Some non-fatal warning"}]
        }),
    )])
    .await;

    let stats = server
        .engine()
        .dry_run(&RenderedQuery::raw("SELECT 1"), DryRunOptions::uncached())
        .await
        .unwrap();
    assert_eq!(stats.total_bytes_processed, 1_234_567_890);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let submitted: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(submitted["dryRun"], json!(true));
    assert_eq!(submitted["useQueryCache"], json!(false));
}

#[tokio::test]
async fn test_job_that_never_completes_hits_the_poll_bound() {
    let server = ScriptedServer::start(vec![(200, json!({"jobReference": job_reference(), "jobComplete": false}))]).await;

    let err = server
        .engine()
        .with_max_polls(3)
        .execute(&RenderedQuery::raw("SELECT 1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, EngineErrorKind::Protocol);
    // one submission plus one status poll per allowed round
    assert_eq!(server.requests().len(), 4);
}

#[tokio::test]
async fn test_oversized_wallet_query_stops_after_the_dry_run() {
    let server = ScriptedServer::start(vec![(
        200,
        json!({"jobReference": job_reference(), "jobComplete": true, "totalBytesProcessed": "350000000000"}),
    )])
    .await;

    let insights = WalletInsights::new(Arc::new(server.engine()), CostPolicy::default());
    let outcome = insights.usdc_transactions(&WalletQuery::new(WALLET)).await.unwrap();

    let rejection = outcome.rejection().unwrap();
    assert_eq!(
        rejection.error,
        "Query would process 350.00 GB, which exceeds the maximum allowed size of 300 GB"
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let submitted: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(submitted["dryRun"], json!(true));
    assert_eq!(submitted["parameterMode"], json!("NAMED"));
}

#[tokio::test]
async fn test_access_denied_surfaces_in_the_estimate_phase() {
    let server = ScriptedServer::start(vec![(
        403,
        json!({"error": {
            "code": 403,
            "message": "Access Denied: Project test-project: User does not have bigquery.jobs.create permission",
            "errors": [{"reason": "accessDenied"}]
        }}),
    )])
    .await;

    let insights = WalletInsights::new(Arc::new(server.engine()), CostPolicy::default());
    let err = insights.estimate("SELECT 1").await.unwrap_err();

    assert!(err.is_access_denied());
    assert!(matches!(
        err,
        InsightsError::RemoteEngine {
            phase: EnginePhase::Estimate,
            ..
        }
    ));
    assert!(err.remediation_hint().is_some());
}
