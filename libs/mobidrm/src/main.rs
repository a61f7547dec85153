use mobidrm::Book;
use std::fs::File;
use std::io::{self, BufReader, Write};
use tracing_subscriber::prelude::*;

fn usage(me: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("{} <file>", me);
    eprintln!("  Lists all PalmDB records in <file>");
    eprintln!("{} <file> --header", me);
    eprintln!("  Prints the parsed PalmDOC/MOBI/EXTH header of <file>");
    eprintln!("{} <file> --setkey <pid>", me);
    eprintln!("  Attempts DRM key recovery with <pid> (\"-\" for type-1 books) and prints the key");
    eprintln!("{} <file> --decrypt <pid> <record#> <output>", me);
    eprintln!("  Recovers the key and decrypts <record#> into <output> (\"-\" for stdout)");
    std::process::exit(1);
}

fn open_book(fname: &str) -> Result<Book<BufReader<File>>, io::Error> {
    let f = File::open(fname).map_err(|e| {
        eprintln!("Failed to open {}: {}", fname, e);
        e
    })?;
    Book::new(BufReader::new(f)).map_err(|e| {
        eprintln!("Failed to parse {}: {}", fname, e);
        io::Error::new(io::ErrorKind::InvalidData, e)
    })
}

fn print_key(book: &Book<BufReader<File>>) {
    match book.key() {
        Some(key) => eprintln!("Key recovery succeeded, key {:x}", key),
        None => eprintln!("Key recovery succeeded (encryption_type == 0, no key set)"),
    }
}

fn main() -> Result<(), io::Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if !(2..=6).contains(&args.len()) {
        usage(&args[0]);
    }

    let fname = &args[1];

    if args.len() == 2 {
        let book = open_book(fname)?;
        for i in 0..book.container().num_records() {
            match book.container().record(i) {
                Ok(data) => println!("record {}: {} bytes", i, data.len()),
                Err(e) => println!("record {}: error: {}", i, e),
            }
        }
    } else if args.len() == 3 && args[2] == "--header" {
        let book = open_book(fname)?;
        println!("PalmDOC header: {:#?}", book.palmdoc_header());
        match book.mobi_header() {
            Some(mh) => println!("MOBI header: {:#?}", mh),
            None => println!("MOBI header: absent"),
        }
        match book.exth_header() {
            Some(exth) => println!("EXTH header: {} records", exth.records.len()),
            None => println!("EXTH header: absent"),
        }
    } else if args.len() == 4 && args[2] == "--setkey" {
        let mut book = open_book(fname)?;
        let pid = if args[3] == "-" { None } else { Some(args[3].as_bytes()) };
        match book.set_key(pid) {
            Ok(()) => print_key(&book),
            Err(e) => eprintln!("Key recovery failed: {}", e),
        }
    } else if args.len() == 6 && args[2] == "--decrypt" {
        let mut book = open_book(fname)?;
        let pid = if args[3] == "-" { None } else { Some(args[3].as_bytes()) };
        book.set_key(pid).map_err(|e| {
            eprintln!("Key recovery failed: {}", e);
            io::Error::new(io::ErrorKind::InvalidData, e)
        })?;

        let record_num: usize = args[4].parse().map_err(|_| {
            eprintln!("Invalid record number: {}", args[4]);
            io::Error::new(io::ErrorKind::InvalidInput, "invalid record number")
        })?;
        let ciphertext = book.container().record(record_num).map_err(|e| {
            eprintln!("Failed to read record {}: {}", record_num, e);
            io::Error::new(io::ErrorKind::InvalidData, e)
        })?;
        let plaintext = book.decrypt(&ciphertext).map_err(|e| {
            eprintln!("Decryption failed: {}", e);
            io::Error::new(io::ErrorKind::InvalidData, e)
        })?;

        let mut writer: Box<dyn Write> = match args[5].as_str() {
            "-" => Box::new(io::stdout()),
            outf => Box::new(File::create(outf)?),
        };
        writer.write_all(&plaintext)?;
    } else {
        usage(&args[0]);
    }
    Ok(())
}
