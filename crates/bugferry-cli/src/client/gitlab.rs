//! GitLab v4 REST client.
//!
//! Attributed writes carry a `Sudo` header naming the destination account;
//! everything else runs as the token owner. Only GETs are retried.

use std::cell::Cell;
use std::time::Duration;

use bugferry_core::model::{Comment, Issue};
use bugferry_core::store::{
    AccessLevel, CreatedIssue, DestinationAccount, DestinationStore, IdentityDirectory,
    Membership, Milestone, StoreError, StoreResult, UploadedFile,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};

use super::{build_agent, decode, get_with_retry, http_error, is_not_found};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct IssueResponse {
    iid: u64,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct NoteResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
    #[serde(default)]
    markdown: String,
}

#[derive(Debug, Deserialize)]
struct MemberResponse {
    id: u64,
    access_level: u32,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: u64,
}

pub struct GitLabClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    retry_delay: Duration,
    requests: Cell<usize>,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry_delay: Duration::from_millis(500),
            requests: Cell::new(0),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.get()
    }

    /// Numeric id of `namespace/name`.
    pub fn project_id(&self, name: &str) -> StoreResult<u64> {
        let encoded = name.trim().trim_matches('/').replace('/', "%2F");
        let project: ProjectResponse = self.get_json(&format!("/projects/{encoded}"), &[])?;
        info!(project = name, id = project.id, "resolved project id");
        Ok(project.id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: &str, url: &str, sudo: Option<&str>) -> ureq::Request {
        self.requests.set(self.requests.get() + 1);
        let request = self
            .agent
            .request(method, url)
            .set("PRIVATE-TOKEN", &self.token);
        match sudo {
            Some(sudo) => request.set("Sudo", sudo),
            None => request,
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> StoreResult<T> {
        let url = self.url(path);
        let response = get_with_retry(&url, self.retry_delay, || {
            query
                .iter()
                .fold(self.request("GET", &url, None), |request, (key, value)| {
                    request.query(key, value)
                })
        })?;
        decode(&url, response)
    }

    fn send_json(
        &self,
        method: &'static str,
        path: &str,
        sudo: Option<&str>,
        body: &JsonValue,
    ) -> StoreResult<ureq::Response> {
        let url = self.url(path);
        self.request(method, &url, sudo)
            .send_json(body)
            .map_err(|err| http_error(method, &url, err))
    }

    fn write_json<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        sudo: Option<&str>,
        body: &JsonValue,
    ) -> StoreResult<T> {
        let response = self.send_json(method, path, sudo, body)?;
        decode(&self.url(path), response)
    }
}

fn multipart_body(boundary: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let safe_name = filename.replace(['"', '\r', '\n'], "_");
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{safe_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn boundary() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("bugferry-{nanos:x}")
}

fn issue_payload(issue: &Issue) -> JsonValue {
    let mut payload = json!({
        "title": issue.title,
        "description": issue.description,
        "labels": issue.labels.join(","),
        "assignee_ids": issue.assignee_ids,
        "confidential": issue.confidential,
        "created_at": issue.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    });
    if let Some(milestone_id) = issue.milestone_id {
        payload["milestone_id"] = json!(milestone_id);
    }
    if let Some(iid) = issue.source_iid {
        payload["iid"] = json!(iid);
    }
    payload
}

impl DestinationStore for GitLabClient {
    fn create_issue(&self, container: u64, issue: &Issue) -> StoreResult<CreatedIssue> {
        let created: IssueResponse = self.write_json(
            "POST",
            &format!("/projects/{container}/issues"),
            Some(&issue.sudo),
            &issue_payload(issue),
        )?;
        Ok(CreatedIssue {
            iid: created.iid,
            web_url: created.web_url,
        })
    }

    fn create_comment(
        &self,
        container: u64,
        issue_iid: u64,
        comment: &Comment,
    ) -> StoreResult<u64> {
        let note: NoteResponse = self.write_json(
            "POST",
            &format!("/projects/{container}/issues/{issue_iid}/notes"),
            Some(&comment.sudo),
            &json!({
                "body": comment.body,
                "created_at": comment.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            }),
        )?;
        Ok(note.id)
    }

    fn close_issue(&self, container: u64, issue_iid: u64, sudo: &str) -> StoreResult<()> {
        self.send_json(
            "PUT",
            &format!("/projects/{container}/issues/{issue_iid}"),
            Some(sudo),
            &json!({ "state_event": "close" }),
        )?;
        Ok(())
    }

    fn upload(&self, container: u64, filename: &str, bytes: &[u8]) -> StoreResult<UploadedFile> {
        let url = self.url(&format!("/projects/{container}/uploads"));
        let boundary = boundary();
        let response = self
            .request("POST", &url, None)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&multipart_body(&boundary, filename, bytes))
            .map_err(|err| http_error("POST", &url, err))?;
        let uploaded: UploadResponse = decode(&url, response)?;
        debug!(filename, url = %uploaded.url, "uploaded file");
        Ok(UploadedFile {
            url: uploaded.url,
            markdown: uploaded.markdown,
        })
    }

    fn list_milestones(&self, container: u64) -> StoreResult<Vec<Milestone>> {
        let path = format!("/projects/{container}/milestones");
        let per_page = PAGE_SIZE.to_string();
        let mut milestones = Vec::new();
        let mut page = 1_u32;
        loop {
            let page_param = page.to_string();
            let batch: Vec<Milestone> = self.get_json(
                &path,
                &[("per_page", per_page.as_str()), ("page", page_param.as_str())],
            )?;
            let raw_len = batch.len();
            milestones.extend(batch);
            if raw_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(milestones)
    }

    fn create_milestone(&self, container: u64, title: &str) -> StoreResult<Milestone> {
        self.write_json(
            "POST",
            &format!("/projects/{container}/milestones"),
            None,
            &json!({ "title": title }),
        )
    }

    fn get_membership(&self, container: u64, account_id: u64) -> StoreResult<Option<Membership>> {
        let member: MemberResponse =
            match self.get_json(&format!("/projects/{container}/members/{account_id}"), &[]) {
                Ok(member) => member,
                Err(err) if is_not_found(&err) => return Ok(None),
                Err(err) => return Err(err),
            };
        Ok(Some(Membership {
            user_id: member.id,
            access_level: member.access_level,
        }))
    }

    fn grant_membership(
        &self,
        container: u64,
        account_id: u64,
        level: AccessLevel,
    ) -> StoreResult<()> {
        self.send_json(
            "POST",
            &format!("/projects/{container}/members"),
            None,
            &json!({ "user_id": account_id, "access_level": level.as_level() }),
        )?;
        Ok(())
    }

    fn set_membership_role(
        &self,
        container: u64,
        account_id: u64,
        level: u32,
    ) -> StoreResult<()> {
        self.send_json(
            "PUT",
            &format!("/projects/{container}/members/{account_id}"),
            None,
            &json!({ "access_level": level }),
        )?;
        Ok(())
    }

    fn remove_membership(&self, container: u64, account_id: u64) -> StoreResult<()> {
        let url = self.url(&format!("/projects/{container}/members/{account_id}"));
        self.request("DELETE", &url, None)
            .call()
            .map_err(|err| http_error("DELETE", &url, err))?;
        Ok(())
    }
}

impl IdentityDirectory for GitLabClient {
    fn search(&self, contact: &str) -> StoreResult<Vec<DestinationAccount>> {
        let users: Vec<UserResponse> = self.get_json("/users", &[("search", contact)])?;
        Ok(users
            .into_iter()
            .map(|user| DestinationAccount {
                id: user.id,
                username: user.username,
            })
            .collect())
    }

    fn user_id(&self, username: &str) -> StoreResult<u64> {
        let users: Vec<UserResponse> = self.get_json("/users", &[("username", username)])?;
        users
            .first()
            .map(|user| user.id)
            .ok_or_else(|| StoreError::NotFound {
                what: format!("GitLab user {username}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn multipart_body_wraps_payload() {
        let body = multipart_body("b0", "trace \"1\".txt", b"abc");
        let text = String::from_utf8(body).expect("utf8");
        assert!(text.starts_with("--b0\r\nContent-Disposition: form-data; name=\"file\"; filename=\"trace _1_.txt\"\r\n"));
        assert!(text.ends_with("\r\n\r\nabc\r\n--b0--\r\n"));
    }

    #[test]
    fn issue_payload_carries_optional_fields_only_when_set() {
        let mut issue = Issue {
            title: "t".to_string(),
            description: "d".to_string(),
            labels: vec!["ui".to_string(), "bug".to_string()],
            milestone_id: None,
            assignee_ids: vec![12],
            confidential: false,
            sudo: "alice".to_string(),
            author_id: 11,
            created_at: Utc.with_ymd_and_hms(2019, 5, 1, 8, 0, 0).single().expect("date"),
            source_iid: None,
            iid: None,
            web_url: None,
        };
        let payload = issue_payload(&issue);
        assert_eq!(payload["labels"], "ui,bug");
        assert_eq!(payload["created_at"], "2019-05-01T08:00:00Z");
        assert!(payload.get("iid").is_none());
        assert!(payload.get("milestone_id").is_none());

        issue.source_iid = Some(42);
        issue.milestone_id = Some(7);
        let payload = issue_payload(&issue);
        assert_eq!(payload["iid"], 42);
        assert_eq!(payload["milestone_id"], 7);
    }

    mod http {
        use httpmock::prelude::*;

        use super::*;

        fn client(server: &MockServer) -> GitLabClient {
            GitLabClient::new(&server.url("/api/v4"), "glpat-test", Duration::from_secs(5))
                .with_retry_delay(Duration::ZERO)
        }

        fn issue() -> Issue {
            Issue {
                title: "Crash on save".to_string(),
                description: "It crashes.".to_string(),
                labels: vec!["Editor".to_string()],
                milestone_id: None,
                assignee_ids: Vec::new(),
                confidential: false,
                sudo: "alice".to_string(),
                author_id: 11,
                created_at: Utc.with_ymd_and_hms(2019, 5, 1, 8, 0, 0).single().expect("date"),
                source_iid: Some(42),
                iid: None,
                web_url: None,
            }
        }

        #[test]
        fn issue_is_created_as_its_author() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/v4/projects/5/issues")
                    .header("private-token", "glpat-test")
                    .header("sudo", "alice")
                    .body_includes("\"iid\":42")
                    .body_includes("\"labels\":\"Editor\"");
                then.status(201).json_body(json!({
                    "iid": 42,
                    "web_url": "https://gitlab.example.com/g/p/-/issues/42"
                }));
            });

            let created = client(&server).create_issue(5, &issue()).expect("create");
            assert_eq!(created.iid, 42);
            assert_eq!(created.web_url, "https://gitlab.example.com/g/p/-/issues/42");
            create.assert_calls(1);
        }

        #[test]
        fn failed_write_is_not_retried() {
            let server = MockServer::start();
            let create = server.mock(|when, then| {
                when.method(POST).path("/api/v4/projects/5/issues");
                then.status(503).body("unavailable");
            });

            let err = client(&server).create_issue(5, &issue()).expect_err("503");
            assert!(matches!(err, StoreError::Http { status: 503, .. }));
            create.assert_calls(1);
        }

        #[test]
        fn reads_are_retried_on_server_errors() {
            let server = MockServer::start();
            let search = server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/users")
                    .query_param("search", "alice@example.com");
                then.status(503);
            });

            let gitlab = client(&server);
            let err = gitlab.search("alice@example.com").expect_err("503");
            assert!(matches!(err, StoreError::Http { status: 503, .. }));
            search.assert_calls(3);
            assert_eq!(gitlab.request_count(), 3);
        }

        #[test]
        fn search_and_username_lookup() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/users")
                    .query_param("search", "alice@example.com");
                then.status(200)
                    .json_body(json!([{ "id": 11, "username": "alice" }]));
            });
            server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/users")
                    .query_param("username", "ghost");
                then.status(200).json_body(json!([]));
            });

            let gitlab = client(&server);
            let found = gitlab.search("alice@example.com").expect("search");
            assert_eq!(
                found,
                vec![DestinationAccount {
                    id: 11,
                    username: "alice".to_string()
                }]
            );
            let err = gitlab.user_id("ghost").expect_err("no such user");
            assert!(matches!(err, StoreError::NotFound { .. }));
        }

        #[test]
        fn non_member_reads_as_none() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/5/members/11");
                then.status(404).json_body(json!({ "message": "404 Not found" }));
            });
            server.mock(|when, then| {
                when.method(GET).path("/api/v4/projects/5/members/12");
                then.status(200).json_body(json!({ "id": 12, "access_level": 40 }));
            });

            let gitlab = client(&server);
            assert_eq!(gitlab.get_membership(5, 11).expect("member"), None);
            assert_eq!(
                gitlab.get_membership(5, 12).expect("member"),
                Some(Membership {
                    user_id: 12,
                    access_level: 40
                })
            );
        }

        #[test]
        fn custom_member_levels_are_raised_and_restored_exactly() {
            use bugferry_core::config::MigrationConfig;
            use bugferry_core::elevation::Elevator;
            use bugferry_core::lock::ElevationLocks;
            use std::time::Duration;

            let server = MockServer::start();
            let locks = tempfile::tempdir().expect("tempdir");
            let config = MigrationConfig::new("https://bugs.example.org");
            let elevator = Elevator::new(
                &config,
                ElevationLocks::new(locks.path(), Duration::from_millis(200)),
            );
            let gitlab = client(&server);

            for (account, custom) in [(21_u64, 15_u32), (22, 5)] {
                let member = format!("/api/v4/projects/5/members/{account}");
                let read = server.mock(|when, then| {
                    when.method(GET).path(member.clone());
                    then.status(200)
                        .json_body(json!({ "id": account, "access_level": custom }));
                });
                let raise = server.mock(|when, then| {
                    when.method(PUT)
                        .path(member.clone())
                        .body_includes("\"access_level\":40");
                    then.status(200)
                        .json_body(json!({ "id": account, "access_level": 40 }));
                });
                let restore = server.mock(|when, then| {
                    when.method(PUT)
                        .path(member.clone())
                        .body_includes(format!("\"access_level\":{custom}"));
                    then.status(200)
                        .json_body(json!({ "id": account, "access_level": custom }));
                });

                let author = DestinationAccount {
                    id: account,
                    username: format!("user{account}"),
                };
                elevator
                    .with_elevation(&gitlab, 5, &author, || Ok(()))
                    .expect("custom level is not a decode error");

                read.assert_calls(1);
                raise.assert_calls(1);
                restore.assert_calls(1);
            }
        }

        #[test]
        fn milestones_are_paged() {
            let server = MockServer::start();
            let full_page: Vec<JsonValue> = (1..=100)
                .map(|id| json!({ "id": id, "title": format!("m{id}") }))
                .collect();
            let first = server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/projects/5/milestones")
                    .query_param("page", "1");
                then.status(200).json_body(JsonValue::Array(full_page.clone()));
            });
            let second = server.mock(|when, then| {
                when.method(GET)
                    .path("/api/v4/projects/5/milestones")
                    .query_param("page", "2");
                then.status(200)
                    .json_body(json!([{ "id": 101, "title": "2.0" }]));
            });

            let milestones = client(&server).list_milestones(5).expect("list");
            assert_eq!(milestones.len(), 101);
            assert_eq!(milestones[100].title, "2.0");
            first.assert_calls(1);
            second.assert_calls(1);
        }

        #[test]
        fn upload_posts_multipart_and_returns_markdown() {
            let server = MockServer::start();
            let upload = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/v4/projects/5/uploads")
                    .header_exists("content-type")
                    .body_includes("filename=\"trace.txt\"")
                    .body_includes("frame 0");
                then.status(201).json_body(json!({
                    "url": "/uploads/abc/trace.txt",
                    "markdown": "[trace.txt](/uploads/abc/trace.txt)"
                }));
            });

            let uploaded = client(&server)
                .upload(5, "trace.txt", b"frame 0")
                .expect("upload");
            assert_eq!(uploaded.url, "/uploads/abc/trace.txt");
            upload.assert_calls(1);
        }

        #[test]
        fn membership_changes_and_close() {
            let server = MockServer::start();
            let grant = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/v4/projects/5/members")
                    .body_includes("\"user_id\":11")
                    .body_includes("\"access_level\":40");
                then.status(201).json_body(json!({ "id": 11, "access_level": 40 }));
            });
            let restore = server.mock(|when, then| {
                when.method(PUT)
                    .path("/api/v4/projects/5/members/12")
                    .body_includes("\"access_level\":30");
                then.status(200).json_body(json!({ "id": 12, "access_level": 30 }));
            });
            let remove = server.mock(|when, then| {
                when.method(DELETE).path("/api/v4/projects/5/members/11");
                then.status(204);
            });
            let close = server.mock(|when, then| {
                when.method(PUT)
                    .path("/api/v4/projects/5/issues/42")
                    .header("sudo", "alice")
                    .body_includes("\"state_event\":\"close\"");
                then.status(200).json_body(json!({ "iid": 42, "state": "closed" }));
            });

            let gitlab = client(&server);
            gitlab
                .grant_membership(5, 11, AccessLevel::Maintainer)
                .expect("grant");
            gitlab
                .set_membership_role(5, 12, AccessLevel::Developer.as_level())
                .expect("restore");
            gitlab.remove_membership(5, 11).expect("remove");
            gitlab.close_issue(5, 42, "alice").expect("close");
            grant.assert_calls(1);
            restore.assert_calls(1);
            remove.assert_calls(1);
            close.assert_calls(1);
        }

        #[test]
        fn project_name_is_url_encoded() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path_includes("/api/v4/projects/group");
                then.status(200).json_body(json!({ "id": 5 }));
            });
            assert_eq!(client(&server).project_id("group/project").expect("id"), 5);
        }
    }
}
