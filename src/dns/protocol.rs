//! implements the DNS message layout on top of the packet buffers

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use derive_more::Display;

use crate::dns::buffer::{
    BufferError, BytePacketBuffer, PacketBuffer, Result, VectorPacketBuffer,
};
use crate::dns::query::Query;

#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord)]
pub enum QueryType {
    UNKNOWN(u16),
    A,     // 1
    NS,    // 2
    CNAME, // 5
    SOA,   // 6
    PTR,   // 12
    MX,    // 15
    TXT,   // 16
    AAAA,  // 28
    SRV,   // 33
    NAPTR, // 35
    OPT,   // 41
    CAA,   // 257
    ANY,   // 255
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::UNKNOWN(x) => x,
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 5,
            QueryType::SOA => 6,
            QueryType::PTR => 12,
            QueryType::MX => 15,
            QueryType::TXT => 16,
            QueryType::AAAA => 28,
            QueryType::SRV => 33,
            QueryType::NAPTR => 35,
            QueryType::OPT => 41,
            QueryType::ANY => 255,
            QueryType::CAA => 257,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            6 => QueryType::SOA,
            12 => QueryType::PTR,
            15 => QueryType::MX,
            16 => QueryType::TXT,
            28 => QueryType::AAAA,
            33 => QueryType::SRV,
            35 => QueryType::NAPTR,
            41 => QueryType::OPT,
            255 => QueryType::ANY,
            257 => QueryType::CAA,
            _ => QueryType::UNKNOWN(num),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            QueryType::UNKNOWN(x) => write!(f, "TYPE{}", x),
            ref other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display(fmt = "unknown mnemonic {:?}", _0)]
pub struct UnknownMnemonic(pub String);

impl std::error::Error for UnknownMnemonic {}

/// Parses a mnemonic such as `AAAA`, the generic `TYPE65` form or a bare
/// number.
fn parse_mnemonic<T>(
    s: &str,
    prefix: &str,
    named: &[(&str, T)],
    from_num: fn(u16) -> T,
) -> std::result::Result<T, UnknownMnemonic>
where
    T: Copy,
{
    let upper = s.to_ascii_uppercase();
    if let Some(&(_, value)) = named.iter().find(|(name, _)| *name == upper) {
        return Ok(value);
    }

    let digits = upper.strip_prefix(prefix).unwrap_or(&upper);
    digits
        .parse::<u16>()
        .map(from_num)
        .map_err(|_| UnknownMnemonic(s.to_string()))
}

impl FromStr for QueryType {
    type Err = UnknownMnemonic;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        const NAMED: &[(&str, QueryType)] = &[
            ("A", QueryType::A),
            ("NS", QueryType::NS),
            ("CNAME", QueryType::CNAME),
            ("SOA", QueryType::SOA),
            ("PTR", QueryType::PTR),
            ("MX", QueryType::MX),
            ("TXT", QueryType::TXT),
            ("AAAA", QueryType::AAAA),
            ("SRV", QueryType::SRV),
            ("NAPTR", QueryType::NAPTR),
            ("OPT", QueryType::OPT),
            ("CAA", QueryType::CAA),
            ("ANY", QueryType::ANY),
        ];

        parse_mnemonic(s, "TYPE", NAMED, QueryType::from_num)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy)]
pub enum QueryClass {
    UNKNOWN(u16),
    IN,   // 1
    CH,   // 3
    HS,   // 4
    NONE, // 254
    ANY,  // 255
}

impl QueryClass {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryClass::UNKNOWN(x) => x,
            QueryClass::IN => 1,
            QueryClass::CH => 3,
            QueryClass::HS => 4,
            QueryClass::NONE => 254,
            QueryClass::ANY => 255,
        }
    }

    pub fn from_num(num: u16) -> QueryClass {
        match num {
            1 => QueryClass::IN,
            3 => QueryClass::CH,
            4 => QueryClass::HS,
            254 => QueryClass::NONE,
            255 => QueryClass::ANY,
            _ => QueryClass::UNKNOWN(num),
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            QueryClass::UNKNOWN(x) => write!(f, "CLASS{}", x),
            ref other => write!(f, "{:?}", other),
        }
    }
}

impl FromStr for QueryClass {
    type Err = UnknownMnemonic;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        const NAMED: &[(&str, QueryClass)] = &[
            ("IN", QueryClass::IN),
            ("CH", QueryClass::CH),
            ("HS", QueryClass::HS),
            ("NONE", QueryClass::NONE),
            ("ANY", QueryClass::ANY),
        ];

        parse_mnemonic(s, "CLASS", NAMED, QueryClass::from_num)
    }
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum ResultCode {
    NOERROR,
    FORMERR,
    SERVFAIL,
    NXDOMAIN,
    NOTIMP,
    REFUSED,
    #[display(fmt = "RCODE{}", _0)]
    OTHER(u8),
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            0 => ResultCode::NOERROR,
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            x => ResultCode::OTHER(x),
        }
    }

    pub fn to_num(&self) -> u8 {
        match *self {
            ResultCode::NOERROR => 0,
            ResultCode::FORMERR => 1,
            ResultCode::SERVFAIL => 2,
            ResultCode::NXDOMAIN => 3,
            ResultCode::NOTIMP => 4,
            ResultCode::REFUSED => 5,
            ResultCode::OTHER(x) => x & 0x0F,
        }
    }
}

/// Representation of a DNS header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl Default for DnsHeader {
    fn default() -> Self {
        DnsHeader::new()
    }
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader {
            id: 0,

            recursion_desired: false,
            truncated_message: false,
            authoritative_answer: false,
            opcode: 0,
            response: false,

            rescode: ResultCode::NOERROR,
            checking_disabled: false,
            authed_data: false,
            z: false,
            recursion_available: false,

            questions: 0,
            answers: 0,
            authoritative_entries: 0,
            resource_entries: 0,
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | ((self.opcode & 0x0F) << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            self.rescode.to_num()
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn binary_len(&self) -> usize {
        12
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.checking_disabled = (b & (1 << 4)) > 0;
        self.authed_data = (b & (1 << 5)) > 0;
        self.z = (b & (1 << 6)) > 0;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType, qclass: QueryClass) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            qclass,
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.qclass.to_num())?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsQuestion> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;
        let qtype = QueryType::from_num(buffer.read_u16()?);
        let qclass = QueryClass::from_num(buffer.read_u16()?);

        Ok(DnsQuestion::new(name, qtype, qclass))
    }
}

/// A resource record whose data is kept as the raw bytes found on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub domain: String,
    pub qtype: QueryType,
    pub class: QueryClass,
    pub ttl: u32,
    pub data: Vec<u8>,
}

impl DnsRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype = QueryType::from_num(buffer.read_u16()?);
        let class = QueryClass::from_num(buffer.read_u16()?);
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()? as usize;

        if data_len > buffer.remaining() {
            return Err(BufferError::InsufficientData);
        }
        let data = buffer.read_bytes(data_len)?;

        Ok(DnsRecord {
            domain,
            qtype,
            class,
            ttl,
            data,
        })
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        if self.data.len() > u16::MAX as usize {
            return Err(BufferError::MessageTooLarge);
        }

        buffer.write_qname(&self.domain)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.class.to_num())?;
        buffer.write_u32(self.ttl)?;
        buffer.write_u16(self.data.len() as u16)?;
        buffer.write_bytes(&self.data)?;

        Ok(())
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        if self.qtype != QueryType::A {
            return None;
        }

        <[u8; 4]>::try_from(&self.data[..]).ok().map(Ipv4Addr::from)
    }

    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        if self.qtype != QueryType::AAAA {
            return None;
        }

        <[u8; 16]>::try_from(&self.data[..]).ok().map(Ipv6Addr::from)
    }

    /// Splits TXT-style data into its character strings.
    pub fn strings(&self) -> Option<Vec<Vec<u8>>> {
        let mut buffer = BytePacketBuffer::new(&self.data);
        buffer.read_binstrings(self.data.len()).ok()
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}\t", self.domain, self.ttl, self.class, self.qtype)?;

        if let Some(addr) = self.ipv4() {
            return write!(f, "{}", addr);
        }
        if let Some(addr) = self.ipv6() {
            return write!(f, "{}", addr);
        }
        if self.qtype == QueryType::TXT {
            if let Some(strings) = self.strings() {
                let quoted: Vec<String> = strings
                    .iter()
                    .map(|s| format!("\"{}\"", s.escape_ascii()))
                    .collect();
                return write!(f, "{}", quoted.join(" "));
            }
        }

        write!(f, "\\# {}", self.data.len())?;
        for b in &self.data {
            write!(f, " {:02x}", b)?;
        }

        Ok(())
    }
}

/// Representation of a complete DNS message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket {
            header: DnsHeader::new(),
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// A recursive query for a single question.
    pub fn query(query: &Query, id: u16) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.header.recursion_desired = true;
        packet.questions.push(query.question());

        packet
    }

    /// Parses a complete message. Either every declared entry is read or
    /// the buffer is restored to where it was and an error is returned.
    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mark = buffer.mark();
        match DnsPacket::read_sections(buffer) {
            Ok(packet) => {
                buffer.commit(mark);
                Ok(packet)
            }
            Err(err) => {
                buffer.rollback(mark)?;
                Err(err)
            }
        }
    }

    fn read_sections<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            result.questions.push(DnsQuestion::read(buffer)?);
        }
        for _ in 0..result.header.answers {
            result.answers.push(DnsRecord::read(buffer)?);
        }
        for _ in 0..result.header.authoritative_entries {
            result.authorities.push(DnsRecord::read(buffer)?);
        }
        for _ in 0..result.header.resource_entries {
            result.resources.push(DnsRecord::read(buffer)?);
        }

        Ok(result)
    }

    pub fn from_bytes(data: &[u8]) -> Result<DnsPacket> {
        let mut buffer = BytePacketBuffer::new(data);
        DnsPacket::from_buffer(&mut buffer)
    }

    /// The id of a message, read without validating anything else.
    pub fn peek_id(data: &[u8]) -> Option<u16> {
        match data {
            [a, b, ..] => Some(u16::from_be_bytes([*a, *b])),
            _ => None,
        }
    }

    /// Writes the message. Section counts are taken from the vectors, not
    /// from the header fields.
    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        let count = |len: usize| -> Result<u16> {
            if len > u16::MAX as usize {
                return Err(BufferError::MessageTooLarge);
            }
            Ok(len as u16)
        };

        let mut header = self.header.clone();
        header.questions = count(self.questions.len())?;
        header.answers = count(self.answers.len())?;
        header.authoritative_entries = count(self.authorities.len())?;
        header.resource_entries = count(self.resources.len())?;
        header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }
        for rec in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
        {
            rec.write(buffer)?;
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::with_capacity(512);
        self.write(&mut buffer)?;

        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::dns::query::QueryId;

    use proptest::prelude::*;
    use rstest::rstest;

    fn txt_reply_prefix() -> Vec<u8> {
        vec![
            0x12, 0x34, // qid
            0x84, // response + AA
            0x00, // rc=NoError
            0x00, 0x01, // num questions
            0x00, 0x01, // num answer RRs
            0x00, 0x00, // num authority RRs
            0x00, 0x00, // num additional RRs
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00,
            0x00, 0x10, // type TXT
            0x00, 0x01, // class IN
        ]
    }

    #[test]
    fn test_header_flags() {
        let mut header = DnsHeader::new();
        header.id = 0xBEEF;
        header.response = true;
        header.opcode = 2;
        header.truncated_message = true;
        header.recursion_desired = true;
        header.recursion_available = true;
        header.rescode = ResultCode::REFUSED;

        let mut buffer = VectorPacketBuffer::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(&[0xBE, 0xEF, 0x93, 0x85], &buffer.buffer[0..4]);

        buffer.seek(0).unwrap();
        let mut parsed = DnsHeader::new();
        parsed.read(&mut buffer).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_encode_query() {
        let query = Query::new(QueryId(1), "www.example.com", QueryType::AAAA, QueryClass::IN)
            .unwrap();
        let data = DnsPacket::query(&query, 0x1234).to_bytes().unwrap();

        assert_eq!(
            &[0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            &data[0..12]
        );
        assert_eq!(12 + 17 + 4, data.len());
        assert_eq!(&[0x00, 28, 0x00, 0x01], &data[29..33]);
        assert_eq!(Some(0x1234), DnsPacket::peek_id(&data));
    }

    #[test]
    fn test_decode_txt_reply() {
        let mut data = txt_reply_prefix();
        data.extend_from_slice(&[
            0xC0, 0x0C, // pointer to question name
            0x00, 0x10, 0x00, 0x01, // TXT IN
            0x01, 0x02, 0x03, 0x04, // TTL
            0x00, 0x0B, // rdata length
            0x04, b'a', 0x00, b'b', b'c', 0x05, b'h', b'e', b'l', b'l', b'o',
        ]);

        let packet = DnsPacket::from_bytes(&data).unwrap();
        assert_eq!(0x1234, packet.header.id);
        assert!(packet.header.response);
        assert!(packet.header.authoritative_answer);
        assert_eq!(1, packet.questions.len());
        assert_eq!("example.com", packet.questions[0].name);

        let rec = &packet.answers[0];
        assert_eq!("example.com", rec.domain);
        assert_eq!(0x0102_0304, rec.ttl);
        assert_eq!(
            Some(vec![b"a\0bc".to_vec(), b"hello".to_vec()]),
            rec.strings()
        );
        assert_eq!(
            "example.com\t16909060\tIN\tTXT\t\"a\\x00bc\" \"hello\"",
            rec.to_string()
        );
    }

    #[test]
    fn test_txt_rdata_with_bad_string_length() {
        let mut data = txt_reply_prefix();
        data.extend_from_slice(&[
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00,
            0x00, 0x10, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x00, 0x03, 0x12, b'a', b'b',
        ]);

        // The message itself is well formed, only the rdata is not.
        let packet = DnsPacket::from_bytes(&data).unwrap();
        assert_eq!(None, packet.answers[0].strings());
    }

    #[rstest]
    #[case::rdata_exceeds_message(&[
        0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00,
        0x00, 0x10, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x00, 0x13, 0x02, b'a', b'b',
    ])]
    #[case::truncated_record(&[
        0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00,
        0x00, 0x10,
    ])]
    #[case::forward_pointer(&[
        0xC0, 0x40, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ])]
    fn test_decode_malformed_answer(#[case] answer: &[u8]) {
        let mut data = txt_reply_prefix();
        data.extend_from_slice(answer);

        assert!(DnsPacket::from_bytes(&data).is_err());
    }

    #[test]
    fn test_decode_truncated_question() {
        let mut data = txt_reply_prefix();
        data.truncate(data.len() - 1);

        assert_eq!(
            Err(BufferError::InsufficientData),
            DnsPacket::from_bytes(&data)
        );
        assert_eq!(Some(0x1234), DnsPacket::peek_id(&data));
        assert_eq!(None, DnsPacket::peek_id(&data[..1]));
    }

    #[test]
    fn test_failed_decode_restores_position() {
        let mut data = txt_reply_prefix();
        data.truncate(20);

        let mut buffer = BytePacketBuffer::new(&data);
        assert!(DnsPacket::from_buffer(&mut buffer).is_err());
        assert_eq!(0, buffer.pos());
    }

    #[test]
    fn test_address_records() {
        let v4 = DnsRecord {
            domain: "a.example".to_string(),
            qtype: QueryType::A,
            class: QueryClass::IN,
            ttl: 60,
            data: vec![1, 2, 3, 4],
        };
        assert_eq!(Some(Ipv4Addr::new(1, 2, 3, 4)), v4.ipv4());
        assert_eq!(None, v4.ipv6());
        assert_eq!("a.example\t60\tIN\tA\t1.2.3.4", v4.to_string());

        let mut v6 = v4.clone();
        v6.qtype = QueryType::AAAA;
        assert_eq!(None, v6.ipv6());
        v6.data = Ipv6Addr::LOCALHOST.octets().to_vec();
        assert_eq!(Some(Ipv6Addr::LOCALHOST), v6.ipv6());

        let mut other = v4.clone();
        other.qtype = QueryType::UNKNOWN(99);
        assert_eq!("a.example\t60\tIN\tTYPE99\t\\# 4 01 02 03 04", other.to_string());
    }

    #[test]
    fn test_response_round_trip_with_compression() {
        let query = Query::new(QueryId(3), "host.example.com", QueryType::A, QueryClass::IN)
            .unwrap();
        let mut packet = DnsPacket::query(&query, 7);
        packet.header.response = true;
        for last in 1..=3 {
            packet.answers.push(DnsRecord {
                domain: "host.example.com".to_string(),
                qtype: QueryType::A,
                class: QueryClass::IN,
                ttl: 300,
                data: vec![10, 0, 0, last],
            });
        }

        let data = packet.to_bytes().unwrap();
        // Each answer name collapses to a two byte pointer.
        assert_eq!(12 + 22 + 3 * (2 + 10 + 4), data.len());

        let parsed = DnsPacket::from_bytes(&data).unwrap();
        assert_eq!(3, parsed.header.answers);
        assert_eq!(packet.answers, parsed.answers);
    }

    #[rstest]
    #[case("a", QueryType::A)]
    #[case("aaaa", QueryType::AAAA)]
    #[case("TYPE65", QueryType::UNKNOWN(65))]
    #[case("16", QueryType::TXT)]
    fn test_parse_query_type(#[case] input: &str, #[case] expected: QueryType) {
        assert_eq!(Ok(expected), input.parse::<QueryType>());
    }

    #[test]
    fn test_parse_mnemonics_errors() {
        assert!("BOGUS".parse::<QueryType>().is_err());
        assert_eq!(Ok(QueryClass::CH), "ch".parse::<QueryClass>());
        assert_eq!(Ok(QueryClass::UNKNOWN(42)), "CLASS42".parse::<QueryClass>());
        assert_eq!("CLASS42", QueryClass::UNKNOWN(42).to_string());
    }

    proptest! {
        #[test]
        fn prop_query_round_trip(
            name in "[a-zA-Z0-9_-]{1,20}(\\.[a-zA-Z0-9_-]{1,20}){0,5}\\.?",
            qtype in any::<u16>(),
            qclass in any::<u16>(),
            id in any::<u16>(),
        ) {
            let qtype = QueryType::from_num(qtype);
            let qclass = QueryClass::from_num(qclass);
            let query = Query::new(QueryId(1), &name, qtype, qclass).unwrap();

            let data = DnsPacket::query(&query, id).to_bytes().unwrap();
            let packet = DnsPacket::from_bytes(&data).unwrap();

            prop_assert_eq!(id, packet.header.id);
            prop_assert!(packet.header.recursion_desired);
            prop_assert_eq!(1, packet.questions.len());
            prop_assert_eq!(name.trim_end_matches('.'), packet.questions[0].name.as_str());
            prop_assert_eq!(qtype, packet.questions[0].qtype);
            prop_assert_eq!(qclass, packet.questions[0].qclass);
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = DnsPacket::from_bytes(&data);
        }
    }
}
