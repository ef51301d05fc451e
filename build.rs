use std::env;
use std::fmt::Write;
use std::path::PathBuf;

/// Compile-time capacities and their defaults, overridable with `TROUBLE_HCI_<NAME>`.
static CONFIGS: &[(&str, usize)] = &[
    ("MAX_CONNECTIONS", 4),
    ("ACL_PAYLOAD_SIZE", 1021),
    ("INCOMING_PACKET_BUFFER_SIZE", 1025),
    ("MAX_EVENT_HANDLERS", 4),
    ("WHITELIST_SIZE", 4),
    ("MAX_PENDING_ACTIONS", 8),
    ("TIMER_LIST_SIZE", 8),
];

fn main() {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());

    let mut data = String::new();
    for (name, default) in CONFIGS {
        let var = format!("TROUBLE_HCI_{}", name);
        println!("cargo:rerun-if-env-changed={}", var);
        let value = match env::var(&var) {
            Ok(v) => match v.parse::<usize>() {
                Ok(n) => n,
                Err(_) => panic!("{} must be an unsigned integer, got {:?}", var, v),
            },
            Err(_) => *default,
        };
        writeln!(&mut data, "pub const {}: usize = {};", name, value).unwrap();
    }

    let out_file = out_dir.join("config.rs");
    std::fs::write(out_file, data).unwrap();
    println!("cargo:rerun-if-changed=build.rs");
}
