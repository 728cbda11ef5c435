// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! an in-process mock PLC.
//!
//! Listens on a loopback socket, speaks the EtherNet/IP encapsulation
//! (session registration, Forward Open/Close, both CPF framings and the
//! Unconnected Send unwrap) and hands every application payload to a
//! per-test handler that scripts the reply. Every payload seen is recorded
//! so tests can assert exact wire bytes and packet counts.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const EIP_HEADER_SIZE: usize = 24;

pub enum MockReply {
    /// answer with this application payload
    Bytes(Vec<u8>),
    /// drop the TCP connection without answering
    Close,
}

pub type Handler = Box<dyn FnMut(&[u8]) -> MockReply + Send>;

pub struct MockPlc {
    pub gateway: String,
    /// application payloads received, in order
    pub payloads: Arc<Mutex<Vec<Vec<u8>>>>,
    /// TCP connections accepted so far
    pub connections: Arc<AtomicUsize>,
}

impl MockPlc {
    pub fn start(handler: Handler) -> MockPlc {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock listener");
        let gateway = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

        let payloads = Arc::new(Mutex::new(vec![]));
        let connections = Arc::new(AtomicUsize::new(0));

        {
            let payloads = Arc::clone(&payloads);
            let connections = Arc::clone(&connections);
            std::thread::spawn(move || {
                let mut handler = handler;
                for stream in listener.incoming() {
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(_) => break,
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    serve(stream, &mut handler, &payloads);
                }
            });
        }

        MockPlc {
            gateway,
            payloads,
            connections,
        }
    }

    pub fn payload_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn payload(&self, index: usize) -> Vec<u8> {
        self.payloads.lock().unwrap()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

struct Connection {
    stream: TcpStream,
    session_handle: u32,
    /// the T->O connection id proposed by the client's Forward Open
    to_conn_id: u32,
    connected_seq: u16,
}

fn serve(stream: TcpStream, handler: &mut Handler, payloads: &Arc<Mutex<Vec<Vec<u8>>>>) {
    let mut conn = Connection {
        stream,
        session_handle: 0x0102_0304,
        to_conn_id: 0,
        connected_seq: 0,
    };

    loop {
        let frame = match read_frame(&mut conn.stream) {
            Some(frame) => frame,
            None => return,
        };

        let command = u16::from_le_bytes([frame[0], frame[1]]);
        match command {
            // register session
            0x0065 => {
                let mut reply = frame.clone();
                reply[4..8].copy_from_slice(&conn.session_handle.to_le_bytes());
                if conn.stream.write_all(&reply).is_err() {
                    return;
                }
            }
            // unregister session
            0x0066 => return,
            0x006F | 0x0070 => {
                if !handle_data(&mut conn, command, &frame, handler, payloads) {
                    return;
                }
            }
            _ => return,
        }
    }
}

/// returns false when the connection should drop
fn handle_data(
    conn: &mut Connection,
    command: u16,
    frame: &[u8],
    handler: &mut Handler,
    payloads: &Arc<Mutex<Vec<Vec<u8>>>>,
) -> bool {
    let cpf = &frame[EIP_HEADER_SIZE..];

    // interface handle (4), router timeout (2), item count (2)
    let addr_type = u16::from_le_bytes([cpf[8], cpf[9]]);
    let mut cursor = 12;

    let connected = addr_type == 0x00A1;
    if connected {
        cursor += 4; // connection id
    }
    let _data_type = u16::from_le_bytes([cpf[cursor], cpf[cursor + 1]]);
    cursor += 4; // data item type + length
    if connected {
        conn.connected_seq = u16::from_le_bytes([cpf[cursor], cpf[cursor + 1]]);
        cursor += 2;
    }

    let mut payload = &cpf[cursor..];

    // handshakes are handled here, ahead of the scripted handler
    if !connected {
        match payload.first() {
            Some(0x54) | Some(0x5B) => {
                let reply = forward_open_reply(conn, payload);
                return send_unconnected(conn, &reply);
            }
            Some(0x4E) if payload.get(2..6) == Some(&[0x20, 0x06, 0x24, 0x01]) => {
                // forward close: echo serial, vendor, vendor serial
                let mut reply = vec![0xCE, 0x00, 0x00, 0x00];
                reply.extend_from_slice(&payload[6..14]);
                return send_unconnected(conn, &reply);
            }
            Some(0x52) if payload.get(2..6) == Some(&[0x20, 0x06, 0x24, 0x01]) => {
                // unconnected send: unwrap the embedded request
                let size = u16::from_le_bytes([payload[8], payload[9]]) as usize;
                payload = &payload[10..10 + size];
            }
            _ => {}
        }
    }

    payloads.lock().unwrap().push(payload.to_vec());

    match handler(payload) {
        MockReply::Bytes(reply) => {
            if connected {
                send_connected(conn, &reply)
            } else {
                send_unconnected(conn, &reply)
            }
        }
        MockReply::Close => {
            let _ = conn.stream.shutdown(std::net::Shutdown::Both);
            false
        }
    }
}

fn forward_open_reply(conn: &mut Connection, request: &[u8]) -> Vec<u8> {
    let service = request[0];
    // service (1), path (5), secs/ticks (2), O->T id (4), then the T->O id
    conn.to_conn_id = u32::from_le_bytes([request[12], request[13], request[14], request[15]]);
    let serial = &request[16..18];

    let mut reply = vec![service | 0x80, 0x00, 0x00, 0x00];
    reply.extend_from_slice(&0x3333_4444u32.to_le_bytes()); // O->T id, ours
    reply.extend_from_slice(&conn.to_conn_id.to_le_bytes());
    reply.extend_from_slice(serial);
    reply.extend_from_slice(&[0x3D, 0xF3]); // vendor echo
    reply.extend_from_slice(&[0x45, 0x43, 0x50, 0x21]); // vendor serial echo
    reply.extend_from_slice(&1_000_000u32.to_le_bytes()); // O->T API
    reply.extend_from_slice(&1_000_000u32.to_le_bytes()); // T->O API
    reply.extend_from_slice(&[0x00, 0x00]); // app reply size, reserved
    reply
}

fn send_unconnected(conn: &mut Connection, payload: &[u8]) -> bool {
    let mut cpf = vec![];
    cpf.extend_from_slice(&0u32.to_le_bytes());
    cpf.extend_from_slice(&0u16.to_le_bytes());
    cpf.extend_from_slice(&2u16.to_le_bytes());
    cpf.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // null address item
    cpf.extend_from_slice(&[0xB2, 0x00]);
    cpf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    cpf.extend_from_slice(payload);
    send_frame(conn, 0x006F, &cpf)
}

fn send_connected(conn: &mut Connection, payload: &[u8]) -> bool {
    let mut cpf = vec![];
    cpf.extend_from_slice(&0u32.to_le_bytes());
    cpf.extend_from_slice(&0u16.to_le_bytes());
    cpf.extend_from_slice(&2u16.to_le_bytes());
    cpf.extend_from_slice(&[0xA1, 0x00, 0x04, 0x00]);
    cpf.extend_from_slice(&conn.to_conn_id.to_le_bytes());
    cpf.extend_from_slice(&[0xB1, 0x00]);
    cpf.extend_from_slice(&((payload.len() + 2) as u16).to_le_bytes());
    cpf.extend_from_slice(&conn.connected_seq.to_le_bytes());
    cpf.extend_from_slice(payload);
    send_frame(conn, 0x0070, &cpf)
}

fn send_frame(conn: &mut Connection, command: u16, body: &[u8]) -> bool {
    let mut frame = vec![0u8; EIP_HEADER_SIZE];
    frame[0..2].copy_from_slice(&command.to_le_bytes());
    frame[2..4].copy_from_slice(&(body.len() as u16).to_le_bytes());
    frame[4..8].copy_from_slice(&conn.session_handle.to_le_bytes());
    frame.extend_from_slice(body);
    conn.stream.write_all(&frame).is_ok()
}

fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; EIP_HEADER_SIZE];
    stream.read_exact(&mut header).ok()?;
    let len = u16::from_le_bytes([header[2], header[3]]) as usize;
    let mut frame = vec![0u8; EIP_HEADER_SIZE + len];
    frame[..EIP_HEADER_SIZE].copy_from_slice(&header);
    stream.read_exact(&mut frame[EIP_HEADER_SIZE..]).ok()?;
    Some(frame)
}

/// strip the PCCC execute wrapper from a recorded payload, asserting its
/// fixed header bytes on the way
pub fn unwrap_pccc(payload: &[u8]) -> Vec<u8> {
    assert_eq!(&payload[..6], &[0x4B, 0x02, 0x20, 0x67, 0x24, 0x01]);
    assert_eq!(payload[6], 0x07);
    payload[13..].to_vec()
}

/// wrap a DF1 reply in the PCCC execute response envelope
pub fn wrap_pccc_reply(body: &[u8]) -> Vec<u8> {
    let mut reply = vec![0xCB, 0x00, 0x00, 0x00, 0x07];
    reply.extend_from_slice(&[0x3D, 0xF3]); // vendor id echo
    reply.extend_from_slice(&[0x45, 0x43, 0x50, 0x21]); // vendor serial echo
    reply.extend_from_slice(body);
    reply
}
