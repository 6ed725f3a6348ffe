use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use staybook::engine::Engine;
use staybook::notify::NotifyHub;
use staybook::wire;

const TOKEN: &str = "front-desk";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(admin_token: Option<&str>) -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("staybook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(dir.join("staybook.journal"), Arc::new(NotifyHub::logging())).unwrap(),
    );
    let token: Option<Arc<str>> = admin_token.map(Arc::from);

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, token).await;
            });
        }
    });

    (addr, engine)
}

struct Client(Framed<TcpStream, LinesCodec>);

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Client(Framed::new(socket, LinesCodec::new()))
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.0.send(line.to_string()).await.unwrap();
        let reply = self.0.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn call(&mut self, mut request: Value) -> Value {
        request["token"] = json!(TOKEN);
        self.send_raw(&request.to_string()).await
    }

    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], json!(true), "unexpected failure: {reply}");
        reply["data"].clone()
    }
}

fn booking_request(resource_id: &Value, check_in: &str, check_out: &str) -> Value {
    json!({
        "op": "create_booking",
        "resource_id": resource_id,
        "guest": {
            "full_name": "Jonas Berg",
            "email": "jonas@example.com",
            "phone": "+46 8 555 0199",
            "id_photo": null
        },
        "option": "standard",
        "check_in": check_in,
        "check_out": check_out,
        "guests": 2
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_round_trip_over_tcp() {
    let (addr, _engine) = start_test_server(Some(TOKEN)).await;
    let mut client = Client::connect(addr).await;

    let created = client
        .ok(json!({ "op": "create_resource", "name": "Harbour flat" }))
        .await;
    let rid = created["id"].clone();
    client
        .ok(json!({ "op": "set_rate", "resource_id": rid, "option": "standard", "price_per_night": 95 }))
        .await;

    // Price comes from the rate sheet when the request leaves it out.
    let booking = client.ok(booking_request(&rid, "2025-03-01", "2025-03-05")).await;
    assert_eq!(booking["status"], json!("pending"));
    assert_eq!(booking["price_per_night"], json!(95));
    assert_eq!(booking["total_price"], json!(380));

    let approved = client
        .ok(json!({ "op": "approve", "booking_id": booking["id"], "admin_notes": "keys at reception" }))
        .await;
    assert_eq!(approved["status"], json!("approved"));

    let refused = client.call(booking_request(&rid, "2025-03-04", "2025-03-08")).await;
    assert_eq!(refused["ok"], json!(false));
    assert_eq!(refused["error"]["kind"], json!("resource_unavailable"));
    assert_eq!(refused["error"]["reason"]["kind"], json!("booked"));

    let touching = client.ok(booking_request(&rid, "2025-03-05", "2025-03-08")).await;
    let rejected = client
        .ok(json!({ "op": "reject", "booking_id": touching["id"], "reason": "dates no longer needed" }))
        .await;
    assert_eq!(rejected["status"], json!("rejected"));

    let again = client
        .call(json!({ "op": "reject", "booking_id": touching["id"], "reason": "again" }))
        .await;
    assert_eq!(again["error"]["kind"], json!("invalid_state"));

    let stats = client.ok(json!({ "op": "stats", "resource_id": rid })).await;
    assert_eq!(stats["approved"], json!(1));
    assert_eq!(stats["rejected"], json!(1));
    assert_eq!(stats["approved_revenue"], json!(380));
}

#[tokio::test]
async fn admin_operations_require_token() {
    let (addr, engine) = start_test_server(Some(TOKEN)).await;
    let mut client = Client::connect(addr).await;

    let reply = client
        .send_raw(r#"{"op":"create_resource","name":"No token"}"#)
        .await;
    assert_eq!(reply["error"]["kind"], json!("unauthorized"));
    let reply = client
        .send_raw(r#"{"op":"create_resource","token":"wrong"}"#)
        .await;
    assert_eq!(reply["error"]["kind"], json!("unauthorized"));
    assert!(engine.list_resources().await.is_empty());

    let rid = Ulid::new();
    engine.create_resource(rid, None, None).await.unwrap();
    // Guest-facing reads and requests go through without a token.
    let reply = client.send_raw(r#"{"op":"list_resources"}"#).await;
    assert_eq!(reply["ok"], json!(true));
    assert_eq!(reply["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn open_server_accepts_admin_calls_without_token() {
    let (addr, _engine) = start_test_server(None).await;
    let mut client = Client::connect(addr).await;
    let reply = client.send_raw(r#"{"op":"create_resource"}"#).await;
    assert_eq!(reply["ok"], json!(true));
}

#[tokio::test]
async fn calendar_administration() {
    let (addr, _engine) = start_test_server(Some(TOKEN)).await;
    let mut client = Client::connect(addr).await;
    let rid = client.ok(json!({ "op": "create_resource" })).await["id"].clone();

    let outcome = client
        .ok(json!({ "op": "block", "resource_id": rid, "from": "2025-06-01", "to": "2025-06-07", "reason": "painting" }))
        .await;
    assert_eq!(outcome["overlapping_booked"], json!([]));

    let mut request = booking_request(&rid, "2025-06-05", "2025-06-09");
    request["price_per_night"] = json!(70);
    let refused = client.call(request.clone()).await;
    assert_eq!(refused["error"]["reason"]["kind"], json!("blackout"));

    let free = client
        .ok(json!({ "op": "availability", "resource_id": rid, "from": "2025-05-30", "to": "2025-06-10" }))
        .await;
    assert_eq!(free.as_array().unwrap().len(), 2);

    let removed = client
        .ok(json!({ "op": "unblock", "resource_id": rid, "from": "2025-06-01", "to": "2025-06-07" }))
        .await;
    assert_eq!(removed["removed"], json!(1));
    client.ok(request.clone()).await;

    client
        .ok(json!({ "op": "toggle_availability", "resource_id": rid, "is_available": false, "message": "owner visiting" }))
        .await;
    let info = client.ok(json!({ "op": "get_resource", "resource_id": rid })).await;
    assert_eq!(info["is_available"], json!(false));
    assert_eq!(info["availability_note"], json!("owner visiting"));
    request["check_in"] = json!("2025-07-01");
    request["check_out"] = json!("2025-07-03");
    let refused = client.call(request).await;
    assert_eq!(refused["error"]["reason"]["kind"], json!("disabled"));
}

#[tokio::test]
async fn malformed_lines_get_error_replies() {
    let (addr, _engine) = start_test_server(None).await;
    let mut client = Client::connect(addr).await;

    let reply = client.send_raw("not json").await;
    assert_eq!(reply["error"]["kind"], json!("bad_request"));
    let reply = client.send_raw(r#"{"op":"drop_tables"}"#).await;
    assert_eq!(reply["error"]["kind"], json!("bad_request"));

    let reply = client
        .send_raw(&json!({ "op": "get_booking", "booking_id": Ulid::new() }).to_string())
        .await;
    assert_eq!(reply["error"]["kind"], json!("not_found"));

    // Missing rate with no explicit price.
    let rid = client.send_raw(r#"{"op":"create_resource"}"#).await["data"]["id"].clone();
    let reply = client
        .send_raw(&booking_request(&rid, "2025-03-01", "2025-03-02").to_string())
        .await;
    assert_eq!(reply["error"]["kind"], json!("validation_error"));

    // The connection is still usable afterwards.
    let reply = client.send_raw(r#"{"op":"list_resources"}"#).await;
    assert_eq!(reply["ok"], json!(true));
}

#[tokio::test]
async fn list_bookings_filters_by_status() {
    let (addr, _engine) = start_test_server(None).await;
    let mut client = Client::connect(addr).await;
    let rid = client.ok(json!({ "op": "create_resource" })).await["id"].clone();
    client
        .ok(json!({ "op": "set_rate", "resource_id": rid, "option": "standard", "price_per_night": 50 }))
        .await;

    let a = client.ok(booking_request(&rid, "2025-09-01", "2025-09-03")).await;
    client.ok(booking_request(&rid, "2025-09-10", "2025-09-12")).await;
    client.ok(json!({ "op": "approve", "booking_id": a["id"] })).await;

    let pending = client
        .ok(json!({ "op": "list_bookings", "status": "pending" }))
        .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    let all = client
        .ok(json!({ "op": "list_bookings", "resource_id": rid }))
        .await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}
