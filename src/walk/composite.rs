//! A walker that chains several walkers in order, draining each to EOF
//! before moving to the next. Used when the CLI mixes a `--stdin` pseudo
//! file with the rest of the tree, or to merge multiple filesystem roots.

use crate::file::File;
use crate::walk::Reader;
use anyhow::Result;

pub struct CompositeWalker {
    readers: Vec<Box<dyn Reader>>,
    current: usize,
}

impl CompositeWalker {
    pub fn new(readers: Vec<Box<dyn Reader>>) -> Self {
        Self { readers, current: 0 }
    }
}

impl Reader for CompositeWalker {
    fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
        while self.current < self.readers.len() {
            let n = self.readers[self.current].read(out)?;
            if n > 0 {
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Info;
    use std::path::PathBuf;

    struct Fixed(Vec<File>);
    impl Reader for Fixed {
        fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let n = self.0.len();
            out.append(&mut self.0);
            Ok(n)
        }
    }

    fn file(name: &str) -> File {
        File::new(
            PathBuf::from(name),
            PathBuf::from(name),
            Info { size: 0, mtime_secs: 0 },
        )
    }

    #[test]
    fn drains_readers_in_order() {
        let mut composite = CompositeWalker::new(vec![
            Box::new(Fixed(vec![file("a"), file("b")])),
            Box::new(Fixed(vec![file("c")])),
        ]);
        let mut out = Vec::new();
        let n = composite.read(&mut out).unwrap();
        assert_eq!(n, 2);
        let n = composite.read(&mut out).unwrap();
        assert_eq!(n, 1);
        let n = composite.read(&mut out).unwrap();
        assert_eq!(n, 0);
        let names: Vec<_> = out.iter().map(|f| f.rel_path.clone()).collect();
        assert_eq!(
            names,
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[test]
    fn empty_composite_is_immediately_exhausted() {
        let mut composite = CompositeWalker::new(vec![]);
        let mut out = Vec::new();
        assert_eq!(composite.read(&mut out).unwrap(), 0);
    }
}
