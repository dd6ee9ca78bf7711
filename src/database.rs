use crate::model::*;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("malformed key of {0} bytes")]
    BadKey(usize),
    #[error("index {0} points at a missing record")]
    DanglingIndex(&'static str),
}

impl From<TransactionError<DbError>> for DbError {
    fn from(err: TransactionError<DbError>) -> Self {
        match err {
            TransactionError::Storage(e) => DbError::Storage(e),
            TransactionError::Abort(e) => e,
        }
    }
}

fn serialize_id(id: u64) -> [u8; 8] {
    id.to_le_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> Result<u64, DbError> {
    let bytes = id.as_ref();
    let array: [u8; 8] = bytes.try_into().map_err(|_| DbError::BadKey(bytes.len()))?;
    Ok(u64::from_le_bytes(array))
}

fn abort_on<T>(err: bincode::Error) -> ConflictableTransactionResult<T, DbError> {
    Err(ConflictableTransactionError::Abort(DbError::Codec(err)))
}

pub trait UserDb {
    type Error;
    /// Returns `None` when the username is already taken.
    fn add_user(&self, user: &User) -> Result<Option<u64>, Self::Error>;
    fn get_user(&self, id: u64) -> Result<Option<User>, Self::Error>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<(u64, User)>, Self::Error>;
}

/// The movie catalog. There is a single catalog shared by every user.
pub trait MovieDb {
    type Error;
    /// Returns `None` when a movie with the same title is already stored.
    fn add_movie(&self, movie: &Movie) -> Result<Option<u64>, Self::Error>;
    fn get_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
    fn get_movies(&self) -> Result<Vec<Entry<Movie>>, Self::Error>;
    /// Overwrites an existing record, returns `false` if there is none.
    fn update_movie(&self, id: u64, movie: &Movie) -> Result<bool, Self::Error>;
    /// Changes only the ranking of the stored record, returns `false` if there is none.
    fn set_ranking(&self, id: u64, ranking: u32) -> Result<bool, Self::Error>;
    fn remove_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
}

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"USERS_USERNAME";
const MOVIES: &[u8] = b"movies";
const MOVIES_TITLE: &[u8] = b"MOVIES_TITLE";

impl UserDb for sled::Db {
    type Error = DbError;

    fn add_user(&self, user: &User) -> Result<Option<u64>, DbError> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let id = self.generate_id()?;
        let key = serialize_id(id);
        let encoded = bincode::serialize(user)?;
        if let Err(err) = (&users, &users_username).transaction(|(users, users_username)| {
            users.insert(&key[..], encoded.as_slice())?;
            if users_username
                .insert(user.username.as_bytes(), &key[..])?
                .is_some()
            {
                sled::transaction::abort(())?;
            }
            Ok(())
        }) {
            match err {
                TransactionError::Storage(e) => return Err(e.into()),
                TransactionError::Abort(()) => return Ok(None),
            };
        }
        Ok(Some(id))
    }

    fn get_user(&self, id: u64) -> Result<Option<User>, DbError> {
        let users = self.open_tree(USERS)?;
        match users.get(serialize_id(id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<(u64, User)>, DbError> {
        let users_username = self.open_tree(USERS_USERNAME)?;
        let users = self.open_tree(USERS)?;
        if let Some(id) = users_username.get(username)? {
            let data = users
                .get(&id)?
                .ok_or(DbError::DanglingIndex("users_username"))?;
            Ok(Some((deserialize_id(id)?, bincode::deserialize(&data)?)))
        } else {
            Ok(None)
        }
    }
}

impl MovieDb for sled::Db {
    type Error = DbError;

    fn add_movie(&self, movie: &Movie) -> Result<Option<u64>, DbError> {
        let movies = self.open_tree(MOVIES)?;
        let movies_title = self.open_tree(MOVIES_TITLE)?;
        let id = self.generate_id()?;
        let key = serialize_id(id);
        let encoded = bincode::serialize(movie)?;
        if let Err(err) = (&movies, &movies_title).transaction(|(movies, movies_title)| {
            movies.insert(&key[..], encoded.as_slice())?;
            if movies_title
                .insert(movie.title.as_bytes(), &key[..])?
                .is_some()
            {
                sled::transaction::abort(())?;
            }
            Ok(())
        }) {
            match err {
                TransactionError::Storage(e) => return Err(e.into()),
                TransactionError::Abort(()) => return Ok(None),
            };
        }
        Ok(Some(id))
    }

    fn get_movie(&self, id: u64) -> Result<Option<Movie>, DbError> {
        let movies = self.open_tree(MOVIES)?;
        match movies.get(serialize_id(id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn get_movies(&self) -> Result<Vec<Entry<Movie>>, DbError> {
        let movies = self.open_tree(MOVIES)?;
        movies
            .iter()
            .map(|item| -> Result<Entry<Movie>, DbError> {
                let (key, data) = item?;
                Ok(Entry::new(deserialize_id(key)?, bincode::deserialize(&data)?))
            })
            .collect()
    }

    fn update_movie(&self, id: u64, movie: &Movie) -> Result<bool, DbError> {
        let movies = self.open_tree(MOVIES)?;
        let key = serialize_id(id);
        let encoded = bincode::serialize(movie)?;
        let updated = movies.transaction(|movies| -> ConflictableTransactionResult<bool, DbError> {
            if movies.get(&key[..])?.is_none() {
                return Ok(false);
            }
            movies.insert(&key[..], encoded.as_slice())?;
            Ok(true)
        })?;
        Ok(updated)
    }

    fn set_ranking(&self, id: u64, ranking: u32) -> Result<bool, DbError> {
        let movies = self.open_tree(MOVIES)?;
        let key = serialize_id(id);
        let updated = movies.transaction(|movies| -> ConflictableTransactionResult<bool, DbError> {
            let data = match movies.get(&key[..])? {
                Some(data) => data,
                None => return Ok(false),
            };
            let mut movie: Movie = match bincode::deserialize(&data) {
                Ok(movie) => movie,
                Err(err) => return abort_on(err),
            };
            movie.ranking = Some(ranking);
            match bincode::serialize(&movie) {
                Ok(encoded) => movies.insert(&key[..], encoded)?,
                Err(err) => return abort_on(err),
            };
            Ok(true)
        })?;
        Ok(updated)
    }

    fn remove_movie(&self, id: u64) -> Result<Option<Movie>, DbError> {
        let movies = self.open_tree(MOVIES)?;
        let movies_title = self.open_tree(MOVIES_TITLE)?;
        let key = serialize_id(id);
        let removed = (&movies, &movies_title).transaction(
            |(movies, movies_title)| -> ConflictableTransactionResult<Option<Movie>, DbError> {
                let data = match movies.remove(&key[..])? {
                    Some(data) => data,
                    None => return Ok(None),
                };
                let movie: Movie = match bincode::deserialize(&data) {
                    Ok(movie) => movie,
                    Err(err) => return abort_on(err),
                };
                movies_title.remove(movie.title.as_bytes())?;
                Ok(Some(movie))
            },
        )?;
        Ok(removed)
    }
}
