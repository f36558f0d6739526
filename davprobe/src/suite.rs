use std::time::{SystemTime, UNIX_EPOCH};

use davprobe_core::{DavClient, StatusCode};

use crate::report::StepResult;

const RESOURCE_NAME: &str = "probe_file.txt";
const PAYLOAD: &[u8] = b"davprobe conformance payload\n";
const UPDATE_MARKER: &[u8] = b"updated by davprobe\n";

const WRITE_OK: &[u16] = &[200, 201, 204];
const EXISTING_CONTAINER_OK: &[u16] = &[200, 201, 204, 405];
const LIST_OK: &[u16] = &[200, 207];
const DELETE_OK: &[u16] = &[200, 204];

/// Ordered WebDAV CRUD suite. With `custom_dir` the container is treated as
/// caller-owned (405 on MKCOL accepted, container never deleted); otherwise
/// a unique container is created for this run and removed at the end.
///
/// Resource steps are gated on the create succeeding; a failed gate records
/// its dependents as skipped. Transport errors become failed steps, never a
/// suite abort.
pub async fn run_suite(
    client: &DavClient,
    custom_dir: Option<&str>,
    debug: bool,
) -> Vec<StepResult> {
    let mut results = Vec::new();

    let (dir, created_here) = match custom_dir {
        Some(dir) => (normalize_dir(dir), false),
        None => (format!("/davprobe_test_{}/", unix_secs()), true),
    };

    let accepted = if created_here {
        WRITE_OK
    } else {
        EXISTING_CONTAINER_OK
    };
    let container_ok = match client.make_collection(&dir).await {
        Ok(status) => {
            results.push(status_step("create_container", status, accepted));
            accepted.contains(&status.as_u16())
        }
        Err(err) => {
            results.push(StepResult::failed("create_container", err.to_string()));
            false
        }
    };

    if !container_ok {
        // Container unusable: fall back to a minimal reachability probe and
        // stop. 404 is an acceptable answer, the server just has to speak.
        match client.get("/davprobe_probe").await {
            Ok(response) if [200, 404].contains(&response.status.as_u16()) => {
                results.push(StepResult::passed(
                    "read_probe",
                    format!("status {}", response.status.as_u16()),
                ));
            }
            Ok(response) => {
                results.push(StepResult::failed(
                    "read_probe",
                    format!("status {}", response.status.as_u16()),
                ));
            }
            Err(err) => results.push(StepResult::failed("read_probe", err.to_string())),
        }
        return results;
    }

    let file_path = format!("{dir}{RESOURCE_NAME}");

    let create_ok = match client.put(&file_path, PAYLOAD.to_vec()).await {
        Ok(status) => {
            results.push(status_step("create_resource", status, WRITE_OK));
            WRITE_OK.contains(&status.as_u16())
        }
        Err(err) => {
            results.push(StepResult::failed("create_resource", err.to_string()));
            false
        }
    };

    if !create_ok {
        results.push(StepResult::skipped("read_resource", GATE_DETAIL));
        results.push(StepResult::skipped("update_resource", GATE_DETAIL));
        results.push(StepResult::skipped("list_container", GATE_DETAIL));
        results.push(StepResult::skipped("delete_resource", GATE_DETAIL));
        if created_here {
            results.push(StepResult::skipped("delete_container", GATE_DETAIL));
        }
        return results;
    }

    let read_ok = match client.get(&file_path).await {
        Ok(response) => {
            let ok = response.status == StatusCode::OK && response.body == PAYLOAD;
            let detail = if ok {
                format!("status 200, {} bytes verified", PAYLOAD.len())
            } else if response.status != StatusCode::OK {
                format!("status {}", response.status.as_u16())
            } else {
                format!(
                    "status 200 but body mismatch ({} bytes, expected {})",
                    response.body.len(),
                    PAYLOAD.len()
                )
            };
            results.push(if ok {
                StepResult::passed("read_resource", detail)
            } else {
                StepResult::failed("read_resource", detail)
            });
            ok
        }
        Err(err) => {
            results.push(StepResult::failed("read_resource", err.to_string()));
            false
        }
    };

    if read_ok {
        let updated = [PAYLOAD, UPDATE_MARKER].concat();
        match client.put(&file_path, updated).await {
            Ok(status) => results.push(status_step("update_resource", status, WRITE_OK)),
            Err(err) => results.push(StepResult::failed("update_resource", err.to_string())),
        }
    } else {
        results.push(StepResult::skipped(
            "update_resource",
            "skipped: read did not verify",
        ));
    }

    match client.propfind(&dir, 1).await {
        Ok(response) => {
            if debug && response.status.as_u16() == 207 {
                let preview = String::from_utf8_lossy(&response.body);
                let cut = preview.chars().take(500).collect::<String>();
                eprintln!("[davprobe] propfind response: {cut}");
            }
            results.push(status_step("list_container", response.status, LIST_OK));
        }
        Err(err) => results.push(StepResult::failed("list_container", err.to_string())),
    }

    match client.delete(&file_path).await {
        Ok(status) => results.push(status_step("delete_resource", status, DELETE_OK)),
        Err(err) => results.push(StepResult::failed("delete_resource", err.to_string())),
    }

    // Never remove a caller-supplied, pre-existing directory.
    if created_here {
        match client.delete(&dir).await {
            Ok(status) => results.push(status_step("delete_container", status, DELETE_OK)),
            Err(err) => results.push(StepResult::failed("delete_container", err.to_string())),
        }
    }

    results
}

const GATE_DETAIL: &str = "skipped: resource was not created";

fn status_step(name: &'static str, status: StatusCode, accepted: &[u16]) -> StepResult {
    let detail = format!("status {}", status.as_u16());
    if accepted.contains(&status.as_u16()) {
        StepResult::passed(name, detail)
    } else {
        StepResult::failed(name, detail)
    }
}

/// Ensure a directory path has exactly one leading and one trailing `/`
/// (callers hand in directories in whichever shape their shell produced).
pub(crate) fn normalize_dir(dir: &str) -> String {
    let mut normalized = String::new();
    if !dir.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(dir);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
