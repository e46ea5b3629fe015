mod test_support;

use serde_json::json;
use test_support::{error_code, open_seeded_workspace, request, request_ok};

#[test]
fn setup_defaults_and_persisted_patches() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded_workspace("gradebook-setup");

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup["reports"]["defaultSortKey"], "score");
    assert_eq!(setup["reports"]["defaultSortDirection"], "desc");
    assert_eq!(setup["reports"]["hardestActivitiesLimit"], 3);
    assert_eq!(setup["reports"]["narrativeActivitiesLimit"], 2);
    assert_eq!(setup["whatIf"]["deltaMin"], -2.0);
    assert_eq!(setup["whatIf"]["deltaMax"], 2.0);
    assert_eq!(setup["whatIf"]["deltaStep"], 0.1);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "reports",
            "patch": { "defaultSortKey": "risk", "hardestActivitiesLimit": 1 }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "whatIf", "patch": { "deltaMax": 3.5 } }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(setup["reports"]["defaultSortKey"], "risk");
    assert_eq!(setup["reports"]["defaultSortDirection"], "desc");
    assert_eq!(setup["reports"]["hardestActivitiesLimit"], 1);
    assert_eq!(setup["whatIf"]["deltaMax"], 3.5);

    // Saved sort preference applies when the request leaves it out.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.class.open",
        json!({ "classId": "c1", "options": { "treatUngradedAsExcluded": false } }),
    );
    assert_eq!(report["options"]["sortKey"], "risk");
    assert_eq!(report["rows"][0]["studentId"], "s-carla");
    assert_eq!(report["hardestActivities"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn setup_update_validates_patches() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded_workspace("gradebook-setup-invalid");

    for (id, params) in [
        ("1", json!({ "section": "reports", "patch": { "defaultSortKey": "name" } })),
        ("2", json!({ "section": "reports", "patch": { "hardestActivitiesLimit": "3" } })),
        ("3", json!({ "section": "reports", "patch": { "treatUngradedAsExcluded": true } })),
        ("4", json!({ "section": "whatIf", "patch": { "deltaMin": 2.5 } })),
        ("5", json!({ "section": "printing", "patch": {} })),
        ("6", json!({ "section": "reports" })),
    ] {
        let resp = request(&mut stdin, &mut reader, id, "setup.update", params);
        assert_eq!(error_code(&resp), Some("bad_params"), "request {}", id);
    }

    let setup = request_ok(&mut stdin, &mut reader, "7", "setup.get", json!({}));
    assert_eq!(setup["reports"]["defaultSortKey"], "score");
    assert_eq!(setup["whatIf"]["deltaMin"], -2.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
