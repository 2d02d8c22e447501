//! Interactive operator menu for a running peer.

use std::io::{self, BufRead, Write};

use crate::peer::{Peer, join_ring, leave_ring, routing};
use crate::ring;

const MAIN_MENU: &str = "
1) Enter the peer address to connect
2) Enter the key to find its successor
3) Enter the filename to take its hash
4) Display pred-id, my-id, and succ-id
5) Display the stored filenames and their keys
6) Display my address
7) Exit";

/// Runs the menu loop until the operator exits (option 7) or stdin ends.
pub fn run(peer: &Peer) -> crate::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!("{MAIN_MENU}");
    loop {
        let Some(input) = prompt(&mut lines, "> Please select an option: ")? else {
            // stdin closed: leave cleanly, as if the operator picked exit.
            leave_and_report(peer);
            return Ok(());
        };
        let Ok(option) = input.parse::<u32>() else {
            println!("Invalid choice.");
            continue;
        };

        match option {
            1 => {
                let Some(initiator) = prompt(&mut lines, "> Enter the initiator address: ")?
                else {
                    continue;
                };
                if let Err(err) = leave_ring(peer) {
                    println!("Could not leave the current ring: {err}");
                    continue;
                }
                match join_ring(peer, &initiator) {
                    Ok(()) => println!("Connected to the ring!"),
                    Err(err) => println!("Could not join the ring: {err}"),
                }
            }
            2 => {
                let Some(raw) = prompt(&mut lines, "> Enter the key to find its successor: ")?
                else {
                    continue;
                };
                let Ok(key) = raw.parse::<u32>() else {
                    println!("Invalid key!");
                    continue;
                };
                match routing::find_successor(peer, key % ring::RING_CAPACITY) {
                    Ok(addr) => println!("Address of the successor: {addr}"),
                    Err(err) => println!("Could not find the successor: {err}"),
                }
            }
            3 => {
                let Some(name) = prompt(&mut lines, "> Enter the file name: ")? else {
                    continue;
                };
                println!("{name} => {}", ring::hash(&name));
            }
            4 => {
                let neighbors = peer.neighbors();
                println!(
                    "({}, {}, {})",
                    slot_id(&neighbors.predecessor),
                    peer.self_node().id,
                    slot_id(&neighbors.successor),
                );
            }
            5 => {
                let entries = peer.store().entries();
                if entries.is_empty() {
                    println!("No files are stored!");
                }
                for (name, key) in entries {
                    println!("{name} => {key}");
                }
            }
            6 => println!("{}", peer.self_node().addr),
            7 => {
                leave_and_report(peer);
                println!("Goodbye!");
                return Ok(());
            }
            _ => println!("Invalid choice."),
        }
    }
}

fn leave_and_report(peer: &Peer) {
    match leave_ring(peer) {
        Ok(()) => println!("Left the ring."),
        Err(err) => println!("Could not leave the ring cleanly: {err}"),
    }
}

fn slot_id(slot: &Option<crate::peer::Node>) -> i64 {
    slot.as_ref().map_or(-1, |node| i64::from(node.id))
}

fn prompt(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    message: &str,
) -> io::Result<Option<String>> {
    print!("{message}");
    io::stdout().flush()?;
    match lines.next() {
        None => Ok(None),
        Some(line) => {
            let line = line?;
            let line = line.trim().to_string();
            Ok(Some(line))
        }
    }
}
