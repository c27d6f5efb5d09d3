use std::cell::RefCell;
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::rc::Rc;

use getopts::Options;
use tracing::error;
use tracing_subscriber::EnvFilter;

use stubdns::dns::client::Result;
use stubdns::{
    Channel, DnsClient, DnsPacket, NameServer, Protocol, QueryClass, QueryType,
    ResolverConfig, SystemTransport,
};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options] NAME", program);
    print!("{}", opts.usage(&brief));
}

fn program_name(args: &[String]) -> String {
    args.first().cloned().unwrap_or_else(|| "stubdns".to_string())
}

fn parse_server(arg: &str) -> Option<NameServer> {
    if let Ok(addr) = arg.parse::<SocketAddr>() {
        return Some(NameServer::new(addr));
    }

    arg.parse::<IpAddr>()
        .ok()
        .map(|ip| NameServer::new(SocketAddr::new(ip, 53)))
}

fn build_config(matches: &getopts::Matches) -> std::result::Result<ResolverConfig, String> {
    let mut config = match matches.opt_str("config") {
        Some(path) => {
            let data = fs::read_to_string(&path).map_err(|e| format!("{}: {}", path, e))?;
            ResolverConfig::from_json(&data).map_err(|e| format!("{}: {}", path, e))?
        }
        None => ResolverConfig::default(),
    };

    let servers = matches.opt_strs("s");
    if !servers.is_empty() {
        config.servers = servers
            .iter()
            .map(|arg| parse_server(arg).ok_or_else(|| format!("invalid server {}", arg)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
    }
    if config.servers.is_empty() {
        config.servers.push(NameServer::new(SocketAddr::new(
            IpAddr::from([127, 0, 0, 1]),
            53,
        )));
    }

    if matches.opt_present("T") {
        config.use_tcp = true;
        for server in config.servers.iter_mut() {
            server.protocol = Protocol::Tcp;
        }
    }
    if matches.opt_present("r") {
        config.rotate = true;
    }
    if let Some(attempts) = matches.opt_str("a") {
        config.attempts = attempts
            .parse()
            .map_err(|_| format!("invalid attempt count {}", attempts))?;
    }
    if let Some(timeout) = matches.opt_str("timeout") {
        config.timeout_ms = timeout
            .parse()
            .map_err(|_| format!("invalid timeout {}", timeout))?;
    }

    config.validate().map_err(|e| e.to_string())?;

    Ok(config)
}

fn print_packet(packet: &DnsPacket) {
    println!(
        ";; id {} rcode {} answers {} authorities {} additional {}",
        packet.header.id,
        packet.header.rescode,
        packet.answers.len(),
        packet.authorities.len(),
        packet.resources.len()
    );

    for rec in &packet.answers {
        println!("{}", rec);
    }
    if !packet.authorities.is_empty() {
        println!(";; authority");
        for rec in &packet.authorities {
            println!("{}", rec);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = program_name(&args);

    let mut opts = Options::new();
    opts.optmulti("s", "server", "Nameserver to query, as IP or IP:PORT", "SERVER");
    opts.optopt("t", "type", "Record type (default A)", "TYPE");
    opts.optopt("c", "class", "Record class (default IN)", "CLASS");
    opts.optflag("T", "tcp", "Query over TCP only");
    opts.optflag("r", "rotate", "Rotate between nameservers");
    opts.optopt("a", "attempts", "Attempts per nameserver", "COUNT");
    opts.optopt("", "timeout", "Initial timeout in milliseconds", "MS");
    opts.optopt("", "config", "Read resolver configuration from a JSON file", "FILE");
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(args.iter().skip(1)) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            process::exit(2);
        }
    };

    if matches.opt_present("h") || matches.free.len() != 1 {
        print_usage(&program, opts);
        return;
    }

    let qtype = match matches.opt_str("t").map(|t| t.parse::<QueryType>()) {
        Some(Ok(qtype)) => qtype,
        Some(Err(e)) => {
            eprintln!("{}", e);
            process::exit(2);
        }
        None => QueryType::A,
    };
    let qclass = match matches.opt_str("c").map(|c| c.parse::<QueryClass>()) {
        Some(Ok(qclass)) => qclass,
        Some(Err(e)) => {
            eprintln!("{}", e);
            process::exit(2);
        }
        None => QueryClass::IN,
    };

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    let mut channel = match Channel::new(config, SystemTransport::new()) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    let outcome: Rc<RefCell<Option<Result<DnsPacket>>>> = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    let submitted = channel.send_query(
        &matches.free[0],
        qtype,
        qclass,
        Box::new(move |_, result| {
            *slot.borrow_mut() = Some(result);
        }),
    );
    if let Err(e) = submitted {
        eprintln!("{}: {}", matches.free[0], e);
        process::exit(1);
    }

    if let Err(e) = channel.run() {
        error!("event loop failed: {}", e);
        process::exit(1);
    }

    let result = outcome.borrow_mut().take();
    match result {
        Some(Ok(packet)) => print_packet(&packet),
        Some(Err(e)) => {
            eprintln!("{}: {}", matches.free[0], e);
            process::exit(1);
        }
        None => {
            eprintln!("{}: no result", matches.free[0]);
            process::exit(1);
        }
    }
}
