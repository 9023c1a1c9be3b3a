/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventCategory {
    #[default]
    Net,
    File,
    Process,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum L4Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Client,
    Server,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventName {
    Connect,
    Read,
    Readv,
    Pread,
    Preadv,
    Recvfrom,
    Recvmsg,
    Write,
    Writev,
    Pwrite,
    Pwritev,
    Sendto,
    Sendmsg,
    Sendmmsg,
    #[default]
    Other,
}

impl EventName {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            EventName::Read
                | EventName::Readv
                | EventName::Pread
                | EventName::Preadv
                | EventName::Recvfrom
                | EventName::Recvmsg
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            EventName::Write
                | EventName::Writev
                | EventName::Pwrite
                | EventName::Pwritev
                | EventName::Sendto
                | EventName::Sendmsg
                | EventName::Sendmmsg
        )
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        match s {
            "connect" => EventName::Connect,
            "read" => EventName::Read,
            "readv" => EventName::Readv,
            "pread" => EventName::Pread,
            "preadv" => EventName::Preadv,
            "recvfrom" => EventName::Recvfrom,
            "recvmsg" => EventName::Recvmsg,
            "write" => EventName::Write,
            "writev" => EventName::Writev,
            "pwrite" => EventName::Pwrite,
            "pwritev" => EventName::Pwritev,
            "sendto" => EventName::Sendto,
            "sendmsg" => EventName::Sendmsg,
            "sendmmsg" => EventName::Sendmmsg,
            _ => EventName::Other,
        }
    }
}

/// One syscall observed on a socket.
///
/// `timestamp` is the end of the syscall and `latency` its duration, both in
/// nanoseconds. `res_val` is the syscall return value, the byte count for
/// data transfers.
#[derive(Clone)]
pub struct SocketEvent {
    pub timestamp: u64,
    pub latency: u64,
    pub category: EventCategory,
    pub name: EventName,

    pub pid: u32,
    pub tid: u32,
    pub comm: String,
    pub container_id: String,
    pub fd: i32,

    pub l4_protocol: L4Protocol,
    pub role: Role,
    pub ip_src: Option<IpAddr>,
    pub ip_dst: IpAddr,
    pub port_src: u16,
    pub port_dst: u16,

    pub payload: Vec<u8>,
    pub res_val: i64,
}

impl Default for SocketEvent {
    fn default() -> Self {
        Self {
            timestamp: 0,
            latency: 0,
            category: EventCategory::Net,
            name: EventName::Other,
            pid: 0,
            tid: 0,
            comm: String::new(),
            container_id: String::new(),
            fd: 0,
            l4_protocol: L4Protocol::Tcp,
            role: Role::Client,
            ip_src: None,
            ip_dst: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_src: 0,
            port_dst: 0,
            payload: vec![],
            res_val: 0,
        }
    }
}

impl SocketEvent {
    pub fn start_time(&self) -> u64 {
        self.timestamp.saturating_sub(self.latency)
    }

    pub fn is_connect(&self) -> bool {
        self.name == EventName::Connect
    }

    // server reads and client writes carry requests
    pub fn is_request(&self) -> bool {
        match self.role {
            Role::Server => self.name.is_read(),
            Role::Client => self.name.is_write(),
        }
    }

    pub fn is_udp(&self) -> bool {
        self.l4_protocol == L4Protocol::Udp
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn ip_src_or_unspecified(&self) -> IpAddr {
        self.ip_src.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl fmt::Debug for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ts={} latency={} pid={} tid={} fd={} {:?} {:?} {}:{} -> {}:{} res={} payload={}B",
            self.name,
            self.timestamp,
            self.latency,
            self.pid,
            self.tid,
            self.fd,
            self.l4_protocol,
            self.role,
            self.ip_src_or_unspecified(),
            self.port_src,
            self.ip_dst,
            self.port_dst,
            self.res_val,
            self.payload.len(),
        )
    }
}
