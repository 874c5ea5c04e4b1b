use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_err, db_update_err, opt_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

const ROLES: [&str; 3] = ["student", "admin", "faculty"];

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

struct NewUser {
    name: String,
    username: String,
    email: String,
    phone: Option<String>,
    password: String,
    role: String,
    class_id: Option<String>,
}

fn validate_new_user(u: &NewUser) -> Result<(), String> {
    if u.username.len() < 3 || u.username.len() > 30 {
        return Err("username must be 3-30 characters".to_string());
    }
    if !u
        .username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("username may only contain letters, digits, underscore".to_string());
    }
    if !u.email.contains('@') || !u.email.contains('.') {
        return Err("invalid email".to_string());
    }
    if u.password.len() < 6 {
        return Err("password must be at least 6 characters".to_string());
    }
    if !ROLES.contains(&u.role.as_str()) {
        return Err("role must be one of: student, admin, faculty".to_string());
    }
    Ok(())
}

/// Username matching is case-insensitive (NOCASE column); email exact.
fn find_existing(conn: &Connection, username: &str, email: &str) -> Result<bool, HandlerErr> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ? OR email = ?",
            (username, email),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_err)?;
    Ok(existing.is_some())
}

fn insert_user(conn: &Connection, u: &NewUser) -> Result<String, HandlerErr> {
    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, username, email, phone, password_sha256, role, class_id, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &u.name,
            &u.username,
            &u.email,
            &u.phone,
            sha256_hex(&u.password),
            &u.role,
            &u.class_id,
            db::now_utc(),
        ),
    )
    .map_err(db_update_err)?;
    Ok(user_id)
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let role = opt_str(&req.params, "role");
    let class_id = opt_str(&req.params, "classId");

    let mut sql = String::from(
        "SELECT id, name, username, email, phone, role, class_id, is_active, created_at
         FROM users WHERE 1 = 1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(role) = role {
        sql.push_str(" AND role = ?");
        args.push(role);
    }
    if let Some(class_id) = class_id {
        sql.push_str(" AND class_id = ?");
        args.push(class_id);
    }
    sql.push_str(" ORDER BY name, username");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let username: String = row.get(2)?;
            let email: String = row.get(3)?;
            let phone: Option<String> = row.get(4)?;
            let role: String = row.get(5)?;
            let class_id: Option<String> = row.get(6)?;
            let is_active: i64 = row.get(7)?;
            let created_at: String = row.get(8)?;
            Ok(json!({
                "id": id,
                "name": name,
                "username": username,
                "email": email,
                "phone": phone,
                "role": role,
                "classId": class_id,
                "isActive": is_active != 0,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => db_query_err(e).response(&req.id),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let new_user = NewUser {
        name: match require_str(&req.params, "name") {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        username: match require_str(&req.params, "username") {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        email: match require_str(&req.params, "email") {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        password: match require_str(&req.params, "password") {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        phone: opt_str(&req.params, "phone"),
        role: opt_str(&req.params, "role").unwrap_or_else(|| "student".to_string()),
        class_id: opt_str(&req.params, "classId"),
    };

    if let Err(message) = validate_new_user(&new_user) {
        return HandlerErr::bad_params(message).response(&req.id);
    }

    if let Some(class_id) = &new_user.class_id {
        let exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM classes WHERE id = ? AND is_active = 1",
                [class_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return db_query_err(e).response(&req.id),
        };
        if exists.is_none() {
            return HandlerErr::not_found("class not found").response(&req.id);
        }
    }

    match find_existing(conn, &new_user.username, &new_user.email) {
        Ok(true) => {
            return HandlerErr::conflict("username or email already exists").response(&req.id)
        }
        Ok(false) => {}
        Err(e) => return e.response(&req.id),
    }

    match insert_user(conn, &new_user) {
        Ok(user_id) => ok(
            &req.id,
            json!({ "userId": user_id, "username": new_user.username }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = opt_str(&req.params, "name");
    let email = opt_str(&req.params, "email");
    let phone = opt_str(&req.params, "phone");
    let class_id = opt_str(&req.params, "classId");
    if name.is_none() && email.is_none() && phone.is_none() && class_id.is_none() {
        return HandlerErr::bad_params("nothing to update").response(&req.id);
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    if exists.is_none() {
        return HandlerErr::not_found("user not found").response(&req.id);
    }

    if let Some(email) = &email {
        if !email.contains('@') || !email.contains('.') {
            return HandlerErr::bad_params("invalid email").response(&req.id);
        }
        let taken: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM users WHERE email = ? AND id != ?",
                (email, &user_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return db_query_err(e).response(&req.id),
        };
        if taken.is_some() {
            return HandlerErr::conflict("email already exists").response(&req.id);
        }
    }

    let updates: [(&str, &Option<String>); 4] = [
        ("name", &name),
        ("email", &email),
        ("phone", &phone),
        ("class_id", &class_id),
    ];
    for (column, value) in updates {
        if let Some(value) = value {
            let sql = format!(
                "UPDATE users SET {} = ?, updated_at = ? WHERE id = ?",
                column
            );
            if let Err(e) = conn.execute(&sql, (value, db::now_utc(), &user_id)) {
                return db_update_err(e).response(&req.id);
            }
        }
    }

    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_users_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let changed = match conn.execute(
        "UPDATE users SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        (db::now_utc(), &user_id),
    ) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };
    if changed == 0 {
        return HandlerErr::not_found("user not found").response(&req.id);
    }
    ok(&req.id, json!({ "ok": true }))
}

/// CSV bulk import. Required columns: name, username, email, password.
/// Optional: phone, class (class name, mapped to its id). Every imported row
/// becomes a student. Rows fail independently; good rows still land.
fn handle_users_bulk_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let csv = match require_str(&req.params, "csv") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let lines: Vec<&str> = csv
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return HandlerErr::bad_params("csv must have a header and at least one data row")
            .response(&req.id);
    }

    let headers: Vec<String> = lines[0]
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    for required in ["name", "username", "email", "password"] {
        if !headers.iter().any(|h| h == required) {
            return HandlerErr::bad_params(format!("missing required column: {}", required))
                .response(&req.id);
        }
    }

    // Class names resolve once up front.
    let class_map: HashMap<String, String> = {
        let mut stmt = match conn.prepare("SELECT name, id FROM classes WHERE is_active = 1") {
            Ok(s) => s,
            Err(e) => return db_query_err(e).response(&req.id),
        };
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let id: String = row.get(1)?;
                Ok((name.to_ascii_lowercase(), id))
            })
            .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>());
        match rows {
            Ok(m) => m,
            Err(e) => return db_query_err(e).response(&req.id),
        }
    };

    let mut created = 0usize;
    let mut failed = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for (i, line) in lines.iter().enumerate().skip(1) {
        let row_no = i + 1;
        let values: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
        if values.len() != headers.len() {
            failed += 1;
            errors.push(format!("Row {}: column count mismatch", row_no));
            continue;
        }
        let field = |key: &str| -> Option<String> {
            headers
                .iter()
                .position(|h| h == key)
                .map(|idx| values[idx].to_string())
                .filter(|v| !v.is_empty())
        };

        let (Some(name), Some(username), Some(email), Some(password)) = (
            field("name"),
            field("username"),
            field("email"),
            field("password"),
        ) else {
            failed += 1;
            errors.push(format!("Row {}: missing required fields", row_no));
            continue;
        };

        let class_id = match field("class") {
            Some(class_name) => match class_map.get(&class_name.to_ascii_lowercase()) {
                Some(id) => Some(id.clone()),
                None => {
                    failed += 1;
                    errors.push(format!("Row {}: class \"{}\" not found", row_no, class_name));
                    continue;
                }
            },
            None => None,
        };

        // Bulk import only creates students.
        let new_user = NewUser {
            name,
            username,
            email,
            phone: field("phone"),
            password,
            role: "student".to_string(),
            class_id,
        };

        if let Err(message) = validate_new_user(&new_user) {
            failed += 1;
            errors.push(format!("Row {}: {}", row_no, message));
            continue;
        }

        match find_existing(conn, &new_user.username, &new_user.email) {
            Ok(true) => {
                failed += 1;
                errors.push(format!("Row {}: username or email already exists", row_no));
                continue;
            }
            Ok(false) => {}
            Err(e) => return e.response(&req.id),
        }

        match insert_user(conn, &new_user) {
            Ok(_) => created += 1,
            Err(e) => {
                failed += 1;
                errors.push(format!("Row {}: {}", row_no, e.message));
            }
        }
    }

    ok(
        &req.id,
        json!({ "created": created, "failed": failed, "errors": errors }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.deactivate" => Some(handle_users_deactivate(state, req)),
        "users.bulkImport" => Some(handle_users_bulk_import(state, req)),
        _ => None,
    }
}
