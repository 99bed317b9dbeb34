//! Session-related [`Database`] implementations.

use common::operations::{By, Delete, Insert, Select, Update};
use futures::TryStreamExt as _;
use mongodb::bson::{self, doc, oid::ObjectId, Bson};
use serde::Deserialize;
use tracerr::Traced;

use crate::{
    domain::session,
    infra::{
        database::{
            self,
            mongo::{document, Error},
            Mongo,
        },
        Database,
    },
};

/// Projection of a session document onto its `_id` only.
#[derive(Debug, Deserialize)]
struct IdOnly {
    /// Internal ID of the matched document.
    #[serde(rename = "_id")]
    id: ObjectId,
}

impl Database<Insert<session::Record>> for Mongo {
    type Ok = session::Record;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(record): Insert<session::Record>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut record = record;
        _ = record
            .last_access_at
            .get_or_insert_with(session::AccessDateTime::now);

        let inserted = self
            .collection
            .insert_one(document::SessionDocument::from(record.clone()))
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;

        let Bson::ObjectId(id) = inserted.inserted_id else {
            return Err(tracerr::new!(Error::UnexpectedIdType))
                .map_err(tracerr::map_from);
        };
        record.id = Some(id);

        Ok(record)
    }
}

impl Database<Select<By<Option<session::Record>, session::Id>>> for Mongo {
    type Ok = Option<session::Record>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<session::Record>, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session_id = by.into_inner();

        self.collection
            .find_one(doc! { "sessionId": AsRef::<str>::as_ref(&session_id) })
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?
            .map(|doc| {
                session::Record::try_from(doc)
                    .map_err(|()| tracerr::new!(Error::MalformedDocument))
                    .map_err(tracerr::map_from)
            })
            .transpose()
    }
}

impl Database<Update<session::Touch>> for Mongo {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(touch): Update<session::Touch>,
    ) -> Result<Self::Ok, Self::Err> {
        let session::Touch { session_id, at } = touch;
        let at = document::to_bson(at);

        self.collection
            .update_one(
                doc! { "sessionId": AsRef::<str>::as_ref(&session_id) },
                doc! { "$set": {
                    "lastAccessAt": at,
                    "updatedAt": at,
                } },
            )
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
            .map(drop)
    }
}

impl Database<Update<session::RewrittenTokens>> for Mongo {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(tokens): Update<session::RewrittenTokens>,
    ) -> Result<Self::Ok, Self::Err> {
        let session::RewrittenTokens {
            session_id,
            session_token_hash,
            refresh_token_hash,
            upstream_access_token,
            upstream_refresh_token,
            access_expires_at,
            refresh_expires_at,
            at,
        } = tokens;
        let at = document::to_bson(at);

        self.collection
            .update_one(
                doc! { "sessionId": AsRef::<str>::as_ref(&session_id) },
                doc! { "$set": {
                    "issuedAt": at,
                    "sessionTokenHash": String::from(session_token_hash),
                    "refreshTokenHash": String::from(refresh_token_hash),
                    "upstreamAccessToken":
                        String::from(upstream_access_token),
                    "upstreamRefreshToken":
                        String::from(upstream_refresh_token),
                    "accessExpiresAt": access_expires_at
                        .map_or(Bson::Null, |d| {
                            Bson::DateTime(document::to_bson(d))
                        }),
                    "refreshExpiresAt": refresh_expires_at
                        .map_or(Bson::Null, |d| {
                            Bson::DateTime(document::to_bson(d))
                        }),
                    "lastAccessAt": at,
                    "updatedAt": at,
                } },
            )
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
            .map(drop)
    }
}

impl Database<Delete<By<u64, session::Trim>>> for Mongo {
    type Ok = u64;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<u64, session::Trim>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session::Trim { identity, keep } = by.into_inner();

        let mut filters = Vec::with_capacity(3);
        for (field, value) in [
            ("user._id", identity.internal_id),
            ("user.id", identity.external_id),
            ("user.email", identity.email),
        ] {
            if let Some(value) = value {
                let value = bson::to_bson(&value)
                    .map_err(tracerr::from_and_wrap!(=> Error))
                    .map_err(tracerr::map_from)?;
                let mut filter = bson::Document::new();
                _ = filter.insert(field, value);
                filters.push(filter);
            }
        }
        if filters.is_empty() {
            return Ok(0);
        }
        let query = doc! { "$or": filters };

        if keep == 0 {
            let deleted = self
                .collection
                .delete_many(query)
                .await
                .map_err(tracerr::from_and_wrap!(=> Error))
                .map_err(tracerr::map_from)?;
            return Ok(deleted.deleted_count);
        }

        let obsolete: Vec<IdOnly> = self
            .collection
            .clone_with_type::<IdOnly>()
            .find(query)
            .projection(doc! { "_id": 1 })
            .sort(doc! { "issuedAt": -1 })
            .skip(u64::try_from(keep).unwrap())
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?
            .try_collect()
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;
        if obsolete.is_empty() {
            return Ok(0);
        }

        let ids = obsolete.into_iter().map(|d| d.id).collect::<Vec<_>>();
        self.collection
            .delete_many(doc! { "_id": { "$in": ids } })
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
            .map(|deleted| deleted.deleted_count)
    }
}

impl Database<Delete<By<u64, session::Expired>>> for Mongo {
    type Ok = u64;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<u64, session::Expired>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session::Expired(deadline) = by.into_inner();

        self.collection
            .delete_many(doc! {
                "refreshExpiresAt": { "$lte": document::to_bson(deadline) },
            })
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
            .map(|deleted| deleted.deleted_count)
    }
}
