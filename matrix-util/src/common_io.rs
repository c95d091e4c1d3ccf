use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Define a Delimiter enum to handle both &str and `Vec<char>`
pub enum Delimiter {
    Str(String),
    Chars(Vec<char>),
    Whitespace,
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter::Str(s.to_string())
    }
}

impl<const N: usize> From<&[char; N]> for Delimiter {
    fn from(chars: &[char; N]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl Delimiter {
    /// Guess from a file name: `.csv[.gz]` is comma-separated, and
    /// everything else is split by tabs or spaces
    pub fn from_file_name(file: &str) -> Self {
        let stripped = file.strip_suffix(".gz").unwrap_or(file);
        if stripped.ends_with(".csv") {
            Delimiter::Str(",".to_string())
        } else {
            Delimiter::Whitespace
        }
    }

    fn split<'a>(&'a self, line: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Delimiter::Str(s) => Box::new(line.split(s.as_str())),
            Delimiter::Chars(chars) => Box::new(line.split(chars.as_slice())),
            Delimiter::Whitespace => Box::new(line.split_whitespace()),
        }
    }
}

///
/// Read every line of the input_file into memory
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_lines(input_file_path: &str) -> anyhow::Result<Vec<Box<str>>> {
    let buf: Box<dyn BufRead> = open_buf_reader(input_file_path)?;
    let mut lines = vec![];
    for x in buf.lines() {
        let x = x?;
        let x = x.trim();
        if !x.is_empty() {
            lines.push(x.to_string().into_boxed_str());
        }
    }
    Ok(lines)
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file_path)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

pub struct ReadLinesOut<T: Send> {
    pub lines: Vec<Vec<T>>,
    pub header: Vec<Box<str>>,
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('%') || line.trim().is_empty()
}

///
/// Read lines of a delimited file and parse every word into `T`
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - delimiter
/// * `hdr_line` - location of a header line (`None` = no header line)
///
/// Comment lines (`#`, `%`) and blank lines are skipped; a word that
/// fails to parse is an error pointing at its line.
///
pub fn read_lines_of_types<T>(
    input_file: &str,
    delim: impl Into<Delimiter>,
    hdr_line: Option<usize>,
) -> anyhow::Result<ReadLinesOut<T>>
where
    T: Send + std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let delim = delim.into();
    let buf_reader: Box<dyn BufRead> = open_buf_reader(input_file)?;

    let lines_raw: Vec<Box<str>> = buf_reader
        .lines()
        .map_while(Result::ok)
        .filter(|x| !is_comment_line(x))
        .map(|x| x.into_boxed_str())
        .collect();

    let (header, body) = match hdr_line {
        Some(n_skip) => {
            if lines_raw.len() < n_skip + 1 {
                return Err(anyhow::anyhow!("not enough data in {}", input_file));
            }
            let header = delim
                .split(lines_raw[n_skip].trim_end())
                .map(|x| x.trim().to_string().into_boxed_str())
                .collect();
            (header, &lines_raw[(n_skip + 1)..])
        }
        None => (vec![], &lines_raw[..]),
    };

    // parsing takes more time, so split them into parallel jobs
    let lines = body
        .par_iter()
        .enumerate()
        .map(|(i, s)| {
            delim
                .split(s.trim_end())
                .map(|w| {
                    w.trim().parse::<T>().map_err(|e| {
                        anyhow::anyhow!("{}: line {}: '{}': {}", input_file, i + 1, w, e)
                    })
                })
                .collect::<anyhow::Result<Vec<T>>>()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ReadLinesOut { lines, header })
}

///
/// Read lines and split them into words by whitespace
///
/// * `input_file` - file name--either gzipped or not
/// * `hdr_line` - location of a header line (`None` = no header line)
///
pub fn read_lines_of_words(
    input_file: &str,
    hdr_line: Option<usize>,
) -> anyhow::Result<ReadLinesOut<Box<str>>> {
    let out = read_lines_of_types::<String>(input_file, Delimiter::Whitespace, hdr_line)?;
    Ok(ReadLinesOut {
        lines: out
            .lines
            .into_iter()
            .map(|words| words.into_iter().map(String::into_boxed_str).collect())
            .collect(),
        header: out.header,
    })
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn std::io::Write>> {
    // we can simply override with stdout
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    mkdir(output_file)?;

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gz_round_trip_and_comments() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("sub").join("x.tsv.gz");
        let file = file.to_str().unwrap();

        let lines = vec!["# comment", "a\tb\tc", "1\t2\t3", "", "4\t5\t6"];
        write_lines(&lines, file)?;

        let out = read_lines_of_types::<f32>(file, "\t", Some(0))?;
        assert_eq!(out.header.len(), 3);
        assert_eq!(out.lines, vec![vec![1., 2., 3.], vec![4., 5., 6.]]);
        Ok(())
    }

    #[test]
    fn parse_error_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("bad.csv");
        let file = file.to_str().unwrap();
        write_lines(&["1,2", "3,x"], file)?;

        let err = read_lines_of_types::<f32>(file, Delimiter::from_file_name(file), None);
        assert!(err.is_err());
        let words = read_lines_of_words(file, None)?;
        assert_eq!(words.lines.len(), 2);
        Ok(())
    }
}
